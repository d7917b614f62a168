//! Consumer links

use tracing::trace;

use crate::endpoint::{EndpointState, LinkEndpoint};
use crate::error::ProviderError;
use crate::meta::{AckMode, ConsumerInfo};
use crate::provider::{AsyncResult, EventSender};
use crate::resource::{AmqpResource, Lifecycle, ResourceState};

const UNSOLICITED_CLOSE: &str = "Remote peer closed the consumer link unexpectedly.";

/// A consumer link.
#[derive(Debug)]
pub struct AmqpConsumer {
    info: ConsumerInfo,
    endpoint: Box<dyn LinkEndpoint>,
    lifecycle: Lifecycle,
    events: EventSender,
}

impl AmqpConsumer {
    pub(crate) fn new(
        info: ConsumerInfo,
        endpoint: Box<dyn LinkEndpoint>,
        events: EventSender,
    ) -> Self {
        Self {
            info,
            endpoint,
            lifecycle: Lifecycle::new(),
            events,
        }
    }

    /// Consumer info this link was created from.
    pub fn info(&self) -> &ConsumerInfo {
        &self.info
    }

    /// Apply the application's acknowledgement policy to the deliveries
    /// currently held by the link.
    ///
    /// Never reports success on a link that is not open: if the link drops
    /// with deliveries unacknowledged, redelivery is the remote peer's
    /// responsibility and this engine must not pretend otherwise.
    pub fn acknowledge(&mut self, mode: AckMode) -> Result<(), ProviderError> {
        if self.lifecycle.state() != ResourceState::Opened {
            return Err(ProviderError::IllegalState("consumer link is not open"));
        }
        trace!(id = %self.info.id, ?mode, "acknowledging deliveries");
        self.endpoint.acknowledge(mode);
        Ok(())
    }
}

impl AmqpResource for AmqpConsumer {
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
    }

    fn failed(&mut self, cause: ProviderError) {
        self.lifecycle.on_failed(cause, &self.events);
    }

    fn process_updates(&mut self) {
        if self.lifecycle.state() == ResourceState::Opened && self.is_closed() {
            match self.endpoint.remote_condition() {
                Some(_) => {
                    let cause = self.remote_error();
                    self.failed(cause);
                }
                None => self.closed(),
            }
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
