//! Producer links
//!
//! A fixed producer attaches one sender link to its configured destination
//! at open time and reuses it for every send. An anonymous producer has no
//! link of its own: its open self-completes locally, and every send attaches
//! a transient sender link addressed to that message's destination, which
//! transmits the single message once the peer confirms the attach and then
//! closes itself. Link creation therefore sits on the critical path of every
//! anonymous send; pooling transient links would remove that round trip but
//! is not implemented.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::endpoint::{EndpointState, LinkEndpoint};
use crate::error::ProviderError;
use crate::meta::{OutboundEnvelope, ProducerInfo};
use crate::provider::{AsyncResult, EventSender};
use crate::resource::{AmqpResource, Lifecycle, ResourceState};

const UNSOLICITED_CLOSE: &str = "Remote peer closed the producer link unexpectedly.";

#[derive(Debug)]
enum ProducerKind {
    /// One long-lived link bound to the configured destination
    Fixed { endpoint: Box<dyn LinkEndpoint> },
    /// No link until a send supplies a destination
    Anonymous,
    /// Short-lived link backing exactly one anonymous send
    Transient {
        endpoint: Box<dyn LinkEndpoint>,
        pending_send: Option<PendingSend>,
    },
}

#[derive(Debug)]
struct PendingSend {
    payload: Bytes,
    request: AsyncResult,
}

/// A producer link.
#[derive(Debug)]
pub struct AmqpProducer {
    info: ProducerInfo,
    kind: ProducerKind,
    lifecycle: Lifecycle,
    events: EventSender,
}

impl AmqpProducer {
    pub(crate) fn fixed(
        info: ProducerInfo,
        endpoint: Box<dyn LinkEndpoint>,
        events: EventSender,
    ) -> Self {
        Self {
            info,
            kind: ProducerKind::Fixed { endpoint },
            lifecycle: Lifecycle::new(),
            events,
        }
    }

    pub(crate) fn anonymous(info: ProducerInfo, events: EventSender) -> Self {
        Self {
            info,
            kind: ProducerKind::Anonymous,
            lifecycle: Lifecycle::new(),
            events,
        }
    }

    /// A single-send link spawned on behalf of an anonymous producer. The
    /// send's request is resolved when the message has been handed to the
    /// link (or the attach was rejected); the link's own open/close carry
    /// throwaway requests nobody waits on.
    pub(crate) fn transient(
        info: ProducerInfo,
        endpoint: Box<dyn LinkEndpoint>,
        envelope: OutboundEnvelope,
        request: AsyncResult,
        events: EventSender,
    ) -> Self {
        Self {
            info,
            kind: ProducerKind::Transient {
                endpoint,
                pending_send: Some(PendingSend {
                    payload: envelope.payload,
                    request,
                }),
            },
            lifecycle: Lifecycle::new(),
            events,
        }
    }

    /// Producer info this link was created from.
    pub fn info(&self) -> &ProducerInfo {
        &self.info
    }

    /// Whether this producer was created without a fixed destination.
    pub fn is_anonymous(&self) -> bool {
        matches!(self.kind, ProducerKind::Anonymous)
    }

    /// Send one message over the already-attached fixed link.
    ///
    /// Anonymous sends never reach this method; the owning session turns
    /// them into transient links instead.
    pub(crate) fn send(
        &mut self,
        envelope: OutboundEnvelope,
        mut request: AsyncResult,
    ) -> Result<(), ProviderError> {
        match &mut self.kind {
            ProducerKind::Fixed { endpoint } => {
                if self.lifecycle.state() != ResourceState::Opened {
                    return Err(ProviderError::IllegalState("producer link is not open"));
                }
                trace!(id = %self.info.id, "sending over fixed producer link");
                endpoint.send(envelope.payload);
                request.complete();
                Ok(())
            }
            _ => Err(ProviderError::IllegalState(
                "send on a non-fixed producer link",
            )),
        }
    }

    fn endpoint(&self) -> Option<&dyn LinkEndpoint> {
        match &self.kind {
            ProducerKind::Fixed { endpoint } | ProducerKind::Transient { endpoint, .. } => {
                Some(endpoint.as_ref())
            }
            ProducerKind::Anonymous => None,
        }
    }
}

impl AmqpResource for AmqpProducer {
    fn state(&self) -> ResourceState {
        self.lifecycle.state()
    }

    fn is_open(&self) -> bool {
        match self.endpoint() {
            Some(endpoint) => endpoint.remote_state() == EndpointState::Active,
            // the anonymous producer never talks to the peer itself
            None => self.lifecycle.state() == ResourceState::Opened,
        }
    }

    fn is_closed(&self) -> bool {
        match self.endpoint() {
            Some(endpoint) => endpoint.remote_state() == EndpointState::Closed,
            None => self.lifecycle.state() == ResourceState::Closed,
        }
    }

    fn open(&mut self, request: AsyncResult) -> Result<(), ProviderError> {
        match &mut self.kind {
            ProducerKind::Fixed { endpoint } | ProducerKind::Transient { endpoint, .. } => {
                endpoint.open();
                self.lifecycle.begin_open(request)
            }
            ProducerKind::Anonymous => {
                // No target address exists yet, so there is nothing to
                // attach; the open must not block the client.
                self.lifecycle.begin_open(request)?;
                self.lifecycle.on_opened();
                Ok(())
            }
        }
    }

    fn opened(&mut self) {
        self.lifecycle.on_opened();

        // A transient link exists for exactly one message: transmit it,
        // resolve the send and immediately start tearing the link down.
        if let ProducerKind::Transient {
            endpoint,
            pending_send,
        } = &mut self.kind
        {
            if let Some(mut send) = pending_send.take() {
                debug!(id = %self.info.id, "transient link attached, transmitting");
                endpoint.send(send.payload);
                send.request.complete();
                endpoint.close();
                let (close_request, _) = AsyncResult::new();
                let _ = self.lifecycle.begin_close(close_request);
            }
        }
    }

    fn close(&mut self, request: AsyncResult) -> Result<(), ProviderError> {
        match &mut self.kind {
            ProducerKind::Fixed { endpoint } | ProducerKind::Transient { endpoint, .. } => {
                endpoint.close();
                self.lifecycle.begin_close(request)
            }
            ProducerKind::Anonymous => {
                self.lifecycle.begin_close(request)?;
                self.lifecycle.on_closed();
                Ok(())
            }
        }
    }

    fn closed(&mut self) {
        self.lifecycle.on_closed();
    }

    fn failed(&mut self, cause: ProviderError) {
        if let ProducerKind::Transient { pending_send, .. } = &mut self.kind {
            if let Some(mut send) = pending_send.take() {
                send.request.fail(cause.clone());
            }
        }
        self.lifecycle.on_failed(cause, &self.events);
    }

    fn process_updates(&mut self) {
        // Nothing pends on a producer between sends; the only update to
        // catch is the peer tearing down an active link.
        if self.lifecycle.state() == ResourceState::Opened && self.is_closed() {
            match self.endpoint().and_then(|e| e.remote_condition()) {
                Some(_) => {
                    let cause = self.remote_error();
                    self.failed(cause);
                }
                None => self.closed(),
            }
        }
    }

    fn remote_error(&self) -> ProviderError {
        let condition = self.endpoint().and_then(|e| e.remote_condition());
        match condition {
            Some(condition) => ProviderError::remotely_closed(
                condition.condition,
                condition.description,
                UNSOLICITED_CLOSE,
            ),
            None => ProviderError::remotely_closed(None, None, UNSOLICITED_CLOSE),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::poll;
    use tokio::sync::mpsc;

    use super::AmqpProducer;
    use crate::meta::{Destination, OutboundEnvelope, ProducerId, ProducerInfo};
    use crate::provider::AsyncResult;
    use crate::resource::{AmqpResource, ResourceState};
    use crate::testkit::MockLinkEndpoint;

    fn producer_info(destination: Option<Destination>) -> ProducerInfo {
        ProducerInfo {
            id: ProducerId(1),
            destination,
        }
    }

    fn envelope() -> OutboundEnvelope {
        OutboundEnvelope {
            destination: Destination::queue("orders"),
            payload: Bytes::from_static(b"payload"),
        }
    }

    #[tokio::test]
    async fn test_anonymous_open_completes_without_remote_signal() {
        let (events, _event_rx) = mpsc::unbounded_channel();
        let mut producer = AmqpProducer::anonymous(producer_info(None), events);
        let (request, receiver) = AsyncResult::new();
        producer.open(request).unwrap();

        assert_eq!(producer.state(), ResourceState::Opened);
        assert_eq!(receiver.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_fixed_open_waits_for_remote_attach() {
        let (events, _event_rx) = mpsc::unbounded_channel();
        let link = MockLinkEndpoint::new();
        let control = link.control();
        let mut producer = AmqpProducer::fixed(
            producer_info(Some(Destination::queue("orders"))),
            Box::new(link),
            events,
        );

        let (request, mut receiver) = AsyncResult::new();
        producer.open(request).unwrap();
        assert_eq!(producer.state(), ResourceState::Opening);
        assert!(poll!(&mut receiver).is_pending());

        control.set_remote_active();
        assert!(producer.is_open());
        producer.opened();
        assert_eq!(producer.state(), ResourceState::Opened);
        assert_eq!(receiver.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_fixed_send_requires_open_link() {
        let (events, _event_rx) = mpsc::unbounded_channel();
        let link = MockLinkEndpoint::new();
        let control = link.control();
        let mut producer = AmqpProducer::fixed(
            producer_info(Some(Destination::queue("orders"))),
            Box::new(link),
            events,
        );

        let (request, _receiver) = AsyncResult::new();
        assert!(producer.send(envelope(), request).is_err());

        let (open_request, _open_rx) = AsyncResult::new();
        producer.open(open_request).unwrap();
        control.set_remote_active();
        producer.opened();

        let (request, receiver) = AsyncResult::new();
        producer.send(envelope(), request).unwrap();
        assert_eq!(control.sent(), vec![Bytes::from_static(b"payload")]);
        assert_eq!(receiver.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_transient_link_sends_and_self_closes_on_attach() {
        let (events, _event_rx) = mpsc::unbounded_channel();
        let link = MockLinkEndpoint::new();
        let control = link.control();
        let (send_request, send_rx) = AsyncResult::new();
        let mut producer = AmqpProducer::transient(
            producer_info(None),
            Box::new(link),
            envelope(),
            send_request,
            events,
        );

        let (open_request, _open_rx) = AsyncResult::new();
        producer.open(open_request).unwrap();
        control.set_remote_active();
        producer.opened();

        assert_eq!(producer.state(), ResourceState::Closing);
        assert!(control.close_requested());
        assert_eq!(control.sent(), vec![Bytes::from_static(b"payload")]);
        assert_eq!(send_rx.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_transient_rejection_fails_the_send() {
        let (events, _event_rx) = mpsc::unbounded_channel();
        let link = MockLinkEndpoint::new();
        let control = link.control();
        let (send_request, send_rx) = AsyncResult::new();
        let mut producer = AmqpProducer::transient(
            producer_info(None),
            Box::new(link),
            envelope(),
            send_request,
            events,
        );

        let (open_request, _open_rx) = AsyncResult::new();
        producer.open(open_request).unwrap();
        control.set_remote_closed(Some("amqp:not-found"), Some("no such queue"));

        let cause = producer.remote_error();
        producer.failed(cause);
        assert_eq!(producer.state(), ResourceState::Failed);
        let error = send_rx.await.unwrap().unwrap_err();
        assert_eq!(error.to_string(), "no such queue");
        assert!(control.sent().is_empty());
    }
}
