//! Implements the connection resource
//!
//! The connection is the root of the resource tree. Its `process_updates`
//! is the entry point the provider's event loop invokes whenever the
//! transport reports new remote data; the pass reconciles the connection's
//! own state (SASL first, nothing else runs until it concludes), then its
//! pending sessions, then recurses into every active session. The
//! recursion order is what guarantees a child is never promoted before its
//! parent.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::endpoint::{ConnectionEndpoint, EndpointState};
use crate::error::ProviderError;
use crate::meta::{ConnectionInfo, SessionId, SessionInfo};
use crate::provider::{AsyncResult, EventSender};
use crate::resource::{AmqpResource, Lifecycle, ResourceState};
use crate::sasl::{SaslAuthenticator, SaslOutcome};
use crate::session::AmqpSession;

mod builder;
pub use builder::Builder;

const UNSOLICITED_CLOSE: &str = "Remote peer closed the connection unexpectedly.";

/// An AMQP connection owning a set of sessions.
#[derive(Debug)]
pub struct AmqpConnection {
    info: Arc<ConnectionInfo>,
    endpoint: Box<dyn ConnectionEndpoint>,
    lifecycle: Lifecycle,
    events: EventSender,

    /// Set once SASL (if any) has concluded and local/remote open agree
    connected: bool,
    /// Present only until negotiation concludes, then dropped
    authenticator: Option<Box<dyn SaslAuthenticator>>,

    sessions: BTreeMap<SessionId, AmqpSession>,
    pending_open_sessions: BTreeMap<SessionId, AmqpSession>,
    pending_close_sessions: BTreeMap<SessionId, AmqpSession>,
}

impl AmqpConnection {
    /// Creates a [`Builder`] for an [`AmqpConnection`].
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn new(
        info: Arc<ConnectionInfo>,
        endpoint: Box<dyn ConnectionEndpoint>,
        authenticator: Option<Box<dyn SaslAuthenticator>>,
        events: EventSender,
    ) -> Self {
        Self {
            info,
            endpoint,
            lifecycle: Lifecycle::new(),
            events,
            connected: false,
            authenticator,
            sessions: BTreeMap::new(),
            pending_open_sessions: BTreeMap::new(),
            pending_close_sessions: BTreeMap::new(),
        }
    }

    /// Connection info this resource was created from.
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Whether SASL has concluded and the remote peer confirmed the open.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The cause recorded when this connection moved to the failed state.
    pub fn failure_cause(&self) -> Option<&ProviderError> {
        self.lifecycle.failure_cause()
    }

    /// Create a session and stage it until the remote peer confirms the
    /// begin.
    pub fn create_session(
        &mut self,
        info: SessionInfo,
        request: AsyncResult,
    ) -> Result<(), ProviderError> {
        if !self.connected {
            return Err(ProviderError::IllegalState("connection is not connected"));
        }
        let id = info.id;
        debug!(%id, "creating session");
        let endpoint = self.endpoint.begin_session();
        let mut session =
            AmqpSession::new(info, self.info.clone(), endpoint, self.events.clone());
        session.open(request)?;
        self.pending_open_sessions.insert(id, session);
        Ok(())
    }

    /// Close an active session and stage it until the remote peer confirms
    /// the end.
    pub fn close_session(
        &mut self,
        session_id: SessionId,
        request: AsyncResult,
    ) -> Result<(), ProviderError> {
        let mut session = self
            .sessions
            .remove(&session_id)
            .ok_or(ProviderError::IllegalState("no such session"))?;
        session.close(request)?;
        self.pending_close_sessions.insert(session_id, session);
        Ok(())
    }

    /// Look up an active (promoted) session.
    pub fn session_mut(&mut self, session_id: SessionId) -> Option<&mut AmqpSession> {
        self.sessions.get_mut(&session_id)
    }

    /// Resolve every request still staged on a pending session. The
    /// connection is going away and no later poll will reconcile them.
    fn abort_pending_sessions(&mut self, cause: &ProviderError) {
        for (id, mut session) in std::mem::take(&mut self.pending_open_sessions) {
            warn!(%id, %cause, "failing session still pending at connection teardown");
            session.failed(cause.clone());
        }
        for (_, mut session) in std::mem::take(&mut self.pending_close_sessions) {
            session.failed(cause.clone());
        }
    }

    fn process_sasl_handshake(&mut self) {
        if self.connected {
            return;
        }
        let Some(authenticator) = self.authenticator.as_mut() else {
            return;
        };
        match authenticator.authenticate() {
            SaslOutcome::InProgress => {}
            SaslOutcome::Ok => {
                debug!("SASL negotiation complete");
                self.authenticator = None;
            }
            SaslOutcome::Failed { description } => {
                // single-shot: never retried after an explicit failure
                self.authenticator = None;
                self.failed(ProviderError::Security(description));
            }
        }
    }

    fn process_pending_sessions(&mut self) {
        if self.pending_open_sessions.is_empty() && self.pending_close_sessions.is_empty() {
            return;
        }

        // Two-phase: collect the ids first, then move the entries out.
        let mut to_promote = Vec::new();
        let mut to_reject = Vec::new();
        for (id, session) in self.pending_open_sessions.iter() {
            if session.is_open() {
                to_promote.push(*id);
            } else if session.is_closed() {
                to_reject.push(*id);
            }
        }

        for id in to_promote {
            if let Some(mut session) = self.pending_open_sessions.remove(&id) {
                session.opened();
                info!(%id, "session is now open");
                self.sessions.insert(id, session);
            }
        }
        for id in to_reject {
            if let Some(mut session) = self.pending_open_sessions.remove(&id) {
                let cause = session.remote_error();
                warn!(%id, %cause, "session open was rejected");
                session.failed(cause);
            }
        }

        let ended: Vec<SessionId> = self
            .pending_close_sessions
            .iter()
            .filter(|(_, session)| session.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in ended {
            if let Some(mut session) = self.pending_close_sessions.remove(&id) {
                session.closed();
                info!(%id, "session is now closed");
            }
        }
    }
}

impl AmqpResource for AmqpConnection {
    fn state(&self) -> ResourceState {
        self.lifecycle.state()
    }

    fn is_open(&self) -> bool {
        self.endpoint.remote_state() == EndpointState::Active
    }

    fn is_closed(&self) -> bool {
        self.endpoint.remote_state() == EndpointState::Closed
    }

    fn open(&mut self, request: AsyncResult) -> Result<(), ProviderError> {
        self.endpoint.set_container_id(&self.info.container_id);
        if let Some(hostname) = self.info.remote_url.host_str() {
            self.endpoint.set_hostname(hostname);
        }
        self.endpoint.open();
        self.lifecycle.begin_open(request)
    }

    fn opened(&mut self) {
        self.lifecycle.on_opened();
    }

    fn close(&mut self, request: AsyncResult) -> Result<(), ProviderError> {
        self.endpoint.close();
        self.lifecycle.begin_close(request)
    }

    fn closed(&mut self) {
        self.lifecycle.on_closed();
        if !self.pending_open_sessions.is_empty() || !self.pending_close_sessions.is_empty() {
            let cause = ProviderError::remotely_closed(
                None,
                None,
                "Connection was closed before the session request completed.",
            );
            self.abort_pending_sessions(&cause);
        }
    }

    fn failed(&mut self, cause: ProviderError) {
        self.abort_pending_sessions(&cause);
        self.lifecycle.on_failed(cause, &self.events);
    }

    /// Reconcile the whole resource tree against newly observed remote
    /// state. Invoked by the provider's event loop; idempotent when nothing
    /// changed remotely.
    #[instrument(skip_all, fields(container_id = %self.info.container_id))]
    fn process_updates(&mut self) {
        self.process_sasl_handshake();
        if !self.connected && self.authenticator.is_some() {
            // no session or link activity is allowed mid-negotiation
            return;
        }

        if !self.connected
            && self.lifecycle.state() != ResourceState::Failed
            && self.endpoint.local_state() == EndpointState::Active
            && self.is_open()
        {
            self.connected = true;
            self.opened();
            info!("connection is now open");
        }

        // We are open locally but the remote side moved away from active
        // with an error attached: either our open failed, or an active
        // connection was torn down. Which of the two it was is decided by
        // whether an open request is still outstanding.
        if self.lifecycle.state() != ResourceState::Failed
            && self.endpoint.local_state() == EndpointState::Active
            && self.endpoint.remote_state() != EndpointState::Active
        {
            let has_condition = self
                .endpoint
                .remote_condition()
                .map(|condition| condition.condition.is_some())
                .unwrap_or(false);
            if has_condition {
                let cause = self.remote_error();
                info!(%cause, "error condition detected on connection");
                self.failed(cause);
            }
        }

        self.process_pending_sessions();

        let mut terminal = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            session.process_updates();
            if session.state().is_terminal() {
                terminal.push(*id);
            }
        }
        for id in terminal {
            info!(%id, "reaping terminal session");
            self.sessions.remove(&id);
        }

        // Transition cleanly to the closed state.
        if self.connected && self.endpoint.remote_state() == EndpointState::Closed {
            self.closed();
        }
    }

    fn remote_error(&self) -> ProviderError {
        match self.endpoint.remote_condition() {
            Some(condition) => ProviderError::remotely_closed(
                condition.condition,
                condition.description,
                UNSOLICITED_CLOSE,
            ),
            None => ProviderError::remotely_closed(None, None, UNSOLICITED_CLOSE),
        }
    }
}
