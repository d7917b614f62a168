//! Scripted in-memory endpoints for unit tests
//!
//! Each mock endpoint hands out an [`EndpointControl`] through which a test
//! flips the observable remote state between polls, standing in for the
//! transport event loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::endpoint::{
    ConnectionEndpoint, Endpoint, EndpointState, LinkEndpoint, RemoteCondition, SessionEndpoint,
};
use crate::meta::AckMode;
use crate::sasl::{SaslAuthenticator, SaslOutcome};

#[derive(Debug)]
struct EndpointInner {
    local: EndpointState,
    remote: EndpointState,
    condition: Option<RemoteCondition>,
    container_id: Option<String>,
    hostname: Option<String>,
    address: Option<String>,
    credit: Option<u32>,
    open_requested: bool,
    close_requested: bool,
    sent: Vec<Bytes>,
    acknowledged: Vec<AckMode>,
}

/// Shared handle scripting one mock endpoint's observable state.
#[derive(Debug, Clone)]
pub(crate) struct EndpointControl {
    inner: Arc<Mutex<EndpointInner>>,
}

impl EndpointControl {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EndpointInner {
                local: EndpointState::Uninitialized,
                remote: EndpointState::Uninitialized,
                condition: None,
                container_id: None,
                hostname: None,
                address: None,
                credit: None,
                open_requested: false,
                close_requested: false,
                sent: Vec::new(),
                acknowledged: Vec::new(),
            })),
        }
    }

    pub(crate) fn set_remote_active(&self) {
        self.inner.lock().unwrap().remote = EndpointState::Active;
    }

    pub(crate) fn set_remote_closed(&self, condition: Option<&str>, description: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.remote = EndpointState::Closed;
        if condition.is_some() || description.is_some() {
            inner.condition = Some(RemoteCondition {
                condition: condition.map(str::to_string),
                description: description.map(str::to_string),
            });
        }
    }

    pub(crate) fn open_requested(&self) -> bool {
        self.inner.lock().unwrap().open_requested
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.inner.lock().unwrap().close_requested
    }

    pub(crate) fn container_id(&self) -> Option<String> {
        self.inner.lock().unwrap().container_id.clone()
    }

    pub(crate) fn hostname(&self) -> Option<String> {
        self.inner.lock().unwrap().hostname.clone()
    }

    pub(crate) fn address(&self) -> Option<String> {
        self.inner.lock().unwrap().address.clone()
    }

    pub(crate) fn credit(&self) -> Option<u32> {
        self.inner.lock().unwrap().credit
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub(crate) fn acknowledged(&self) -> Vec<AckMode> {
        self.inner.lock().unwrap().acknowledged.clone()
    }
}

macro_rules! impl_endpoint {
    ($ty:ident) => {
        impl Endpoint for $ty {
            fn local_state(&self) -> EndpointState {
                self.control.inner.lock().unwrap().local
            }

            fn remote_state(&self) -> EndpointState {
                self.control.inner.lock().unwrap().remote
            }

            fn remote_condition(&self) -> Option<RemoteCondition> {
                self.control.inner.lock().unwrap().condition.clone()
            }

            fn open(&mut self) {
                let mut inner = self.control.inner.lock().unwrap();
                inner.local = EndpointState::Active;
                inner.open_requested = true;
            }

            fn close(&mut self) {
                let mut inner = self.control.inner.lock().unwrap();
                inner.local = EndpointState::Closed;
                inner.close_requested = true;
            }
        }
    };
}

#[derive(Debug)]
pub(crate) struct MockLinkEndpoint {
    control: EndpointControl,
}

impl MockLinkEndpoint {
    pub(crate) fn new() -> Self {
        Self {
            control: EndpointControl::new(),
        }
    }

    pub(crate) fn control(&self) -> EndpointControl {
        self.control.clone()
    }
}

impl_endpoint!(MockLinkEndpoint);

impl LinkEndpoint for MockLinkEndpoint {
    fn send(&mut self, payload: Bytes) {
        self.control.inner.lock().unwrap().sent.push(payload);
    }

    fn acknowledge(&mut self, mode: AckMode) {
        self.control.inner.lock().unwrap().acknowledged.push(mode);
    }
}

#[derive(Debug)]
pub(crate) struct MockSessionEndpoint {
    control: EndpointControl,
    links: Arc<Mutex<Vec<EndpointControl>>>,
}

impl MockSessionEndpoint {
    pub(crate) fn new() -> Self {
        Self {
            control: EndpointControl::new(),
            links: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn control(&self) -> EndpointControl {
        self.control.clone()
    }

    /// Controls of every link endpoint attached so far, in attach order.
    pub(crate) fn links(&self) -> Arc<Mutex<Vec<EndpointControl>>> {
        self.links.clone()
    }
}

impl_endpoint!(MockSessionEndpoint);

impl SessionEndpoint for MockSessionEndpoint {
    fn attach_sender(&mut self, address: &str) -> Box<dyn LinkEndpoint> {
        let link = MockLinkEndpoint::new();
        link.control.inner.lock().unwrap().address = Some(address.to_string());
        self.links.lock().unwrap().push(link.control());
        Box::new(link)
    }

    fn attach_receiver(&mut self, address: &str, credit: u32) -> Box<dyn LinkEndpoint> {
        let link = MockLinkEndpoint::new();
        {
            let mut inner = link.control.inner.lock().unwrap();
            inner.address = Some(address.to_string());
            inner.credit = Some(credit);
        }
        self.links.lock().unwrap().push(link.control());
        Box::new(link)
    }
}

/// Control and link registry of one session spawned by a mock connection.
#[derive(Debug, Clone)]
pub(crate) struct SessionHandle {
    pub(crate) control: EndpointControl,
    pub(crate) links: Arc<Mutex<Vec<EndpointControl>>>,
}

#[derive(Debug)]
pub(crate) struct MockConnectionEndpoint {
    control: EndpointControl,
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
}

impl MockConnectionEndpoint {
    pub(crate) fn new() -> Self {
        Self {
            control: EndpointControl::new(),
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn control(&self) -> EndpointControl {
        self.control.clone()
    }

    /// Handles of every session endpoint begun so far, in begin order.
    pub(crate) fn sessions(&self) -> Arc<Mutex<Vec<SessionHandle>>> {
        self.sessions.clone()
    }
}

impl_endpoint!(MockConnectionEndpoint);

impl ConnectionEndpoint for MockConnectionEndpoint {
    fn set_container_id(&mut self, container_id: &str) {
        self.control.inner.lock().unwrap().container_id = Some(container_id.to_string());
    }

    fn set_hostname(&mut self, hostname: &str) {
        self.control.inner.lock().unwrap().hostname = Some(hostname.to_string());
    }

    fn begin_session(&mut self) -> Box<dyn SessionEndpoint> {
        let session = MockSessionEndpoint::new();
        self.sessions.lock().unwrap().push(SessionHandle {
            control: session.control(),
            links: session.links(),
        });
        Box::new(session)
    }
}

/// Authenticator replaying a scripted sequence of outcomes.
#[derive(Debug)]
pub(crate) struct MockAuthenticator {
    script: VecDeque<SaslOutcome>,
}

impl MockAuthenticator {
    pub(crate) fn new(script: impl IntoIterator<Item = SaslOutcome>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }
}

impl SaslAuthenticator for MockAuthenticator {
    fn authenticate(&mut self) -> SaslOutcome {
        self.script.pop_front().unwrap_or(SaslOutcome::Ok)
    }
}
