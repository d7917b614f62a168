//! Implements the session resource
//!
//! A session multiplexes a set of producer and consumer links inside one
//! connection. Locally requested link opens and closes are staged in pending
//! lists (shared by both link kinds, so membership is by scan rather than by
//! key) and reconciled against the observed remote state on every poll.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::endpoint::{EndpointState, SessionEndpoint};
use crate::error::ProviderError;
use crate::link::{AmqpConsumer, AmqpLink, AmqpProducer};
use crate::meta::{
    AckMode, ConnectionInfo, ConsumerId, ConsumerInfo, Destination, DestinationKind,
    OutboundEnvelope, ProducerId, ProducerInfo, SessionInfo,
};
use crate::provider::{AsyncResult, EventSender};
use crate::resource::{AmqpResource, Lifecycle, ResourceState};

const UNSOLICITED_CLOSE: &str = "Remote peer closed the session unexpectedly.";

/// A session owning a set of producer and consumer links.
#[derive(Debug)]
pub struct AmqpSession {
    info: SessionInfo,
    connection_info: Arc<ConnectionInfo>,
    endpoint: Box<dyn SessionEndpoint>,
    lifecycle: Lifecycle,
    events: EventSender,

    consumers: BTreeMap<ConsumerId, AmqpConsumer>,
    producers: BTreeMap<ProducerId, AmqpProducer>,

    pending_open_links: Vec<AmqpLink>,
    pending_close_links: Vec<AmqpLink>,
}

impl AmqpSession {
    pub(crate) fn new(
        info: SessionInfo,
        connection_info: Arc<ConnectionInfo>,
        endpoint: Box<dyn SessionEndpoint>,
        events: EventSender,
    ) -> Self {
        Self {
            info,
            connection_info,
            endpoint,
            lifecycle: Lifecycle::new(),
            events,
            consumers: BTreeMap::new(),
            producers: BTreeMap::new(),
            pending_open_links: Vec::new(),
            pending_close_links: Vec::new(),
        }
    }

    /// Session info this resource was created from.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Adds the connection's topic or queue prefix to a destination name.
    ///
    /// Temporary destinations carry peer-assigned addresses and are passed
    /// through untouched. Pure and deterministic for a given prefix
    /// configuration and destination.
    pub fn qualified_name(&self, destination: &Destination) -> String {
        if destination.temporary {
            return destination.name.clone();
        }
        match destination.kind {
            DestinationKind::Queue => {
                format!("{}{}", self.connection_info.queue_prefix, destination.name)
            }
            DestinationKind::Topic => {
                format!("{}{}", self.connection_info.topic_prefix, destination.name)
            }
        }
    }

    /// Create a producer link, fixed or anonymous depending on whether a
    /// destination was supplied, and stage it for opening.
    pub fn create_producer(
        &mut self,
        info: ProducerInfo,
        request: AsyncResult,
    ) -> Result<(), ProviderError> {
        if self.lifecycle.state() != ResourceState::Opened {
            return Err(ProviderError::IllegalState("session is not open"));
        }
        match &info.destination {
            Some(destination) => {
                debug!(id = %info.id, ?destination, "creating fixed producer");
                let address = self.qualified_name(destination);
                let endpoint = self.endpoint.attach_sender(&address);
                let mut producer = AmqpProducer::fixed(info, endpoint, self.events.clone());
                producer.open(request)?;
                self.pending_open_links.push(AmqpLink::Producer(producer));
            }
            None => {
                debug!(id = %info.id, "creating anonymous producer");
                let id = info.id;
                let mut producer = AmqpProducer::anonymous(info, self.events.clone());
                // self-completes, no remote round trip to stage
                producer.open(request)?;
                self.producers.insert(id, producer);
            }
        }
        Ok(())
    }

    /// Create a consumer link and stage it for opening.
    pub fn create_consumer(
        &mut self,
        info: ConsumerInfo,
        request: AsyncResult,
    ) -> Result<(), ProviderError> {
        if self.lifecycle.state() != ResourceState::Opened {
            return Err(ProviderError::IllegalState("session is not open"));
        }
        debug!(id = %info.id, destination = ?info.destination, "creating consumer");
        let address = self.qualified_name(&info.destination);
        let endpoint = self.endpoint.attach_receiver(&address, info.prefetch);
        let mut consumer = AmqpConsumer::new(info, endpoint, self.events.clone());
        consumer.open(request)?;
        self.pending_open_links.push(AmqpLink::Consumer(consumer));
        Ok(())
    }

    /// Close an active producer link and stage it until the remote confirms.
    pub fn close_producer(
        &mut self,
        producer_id: ProducerId,
        request: AsyncResult,
    ) -> Result<(), ProviderError> {
        let mut producer = self
            .producers
            .remove(&producer_id)
            .ok_or(ProviderError::IllegalState("no such producer"))?;
        producer.close(request)?;
        if !producer.state().is_terminal() {
            self.pending_close_links.push(AmqpLink::Producer(producer));
        }
        Ok(())
    }

    /// Close an active consumer link and stage it until the remote confirms.
    pub fn close_consumer(
        &mut self,
        consumer_id: ConsumerId,
        request: AsyncResult,
    ) -> Result<(), ProviderError> {
        let mut consumer = self
            .consumers
            .remove(&consumer_id)
            .ok_or(ProviderError::IllegalState("no such consumer"))?;
        consumer.close(request)?;
        self.pending_close_links.push(AmqpLink::Consumer(consumer));
        Ok(())
    }

    /// Dispatch one message send.
    ///
    /// A fixed producer reuses its open link. An anonymous producer attaches
    /// a transient link addressed to the envelope's destination; the request
    /// resolves once that link attaches and the message has been handed to
    /// it, so send latency includes one full open-link round trip.
    pub fn send(
        &mut self,
        producer_id: ProducerId,
        envelope: OutboundEnvelope,
        request: AsyncResult,
    ) -> Result<(), ProviderError> {
        if self.lifecycle.state() != ResourceState::Opened {
            return Err(ProviderError::IllegalState("session is not open"));
        }
        let anonymous = match self.producers.get(&producer_id) {
            Some(producer) => producer.is_anonymous(),
            None => return Err(ProviderError::IllegalState("no such producer")),
        };

        if anonymous {
            let address = self.qualified_name(&envelope.destination);
            debug!(id = %producer_id, %address, "attaching transient link for anonymous send");
            let endpoint = self.endpoint.attach_sender(&address);
            let info = ProducerInfo {
                id: producer_id,
                destination: Some(envelope.destination.clone()),
            };
            let mut transient =
                AmqpProducer::transient(info, endpoint, envelope, request, self.events.clone());
            let (open_request, _) = AsyncResult::new();
            transient.open(open_request)?;
            self.pending_open_links.push(AmqpLink::Producer(transient));
            Ok(())
        } else {
            match self.producers.get_mut(&producer_id) {
                Some(producer) => producer.send(envelope, request),
                None => Err(ProviderError::IllegalState("no such producer")),
            }
        }
    }

    /// Acknowledge all delivered messages across every open consumer in
    /// this session.
    pub fn acknowledge_all(&mut self, mode: AckMode) {
        for consumer in self.consumers.values_mut() {
            if consumer.state() == ResourceState::Opened {
                // a consumer that is not open has nothing to settle
                let _ = consumer.acknowledge(mode);
            }
        }
    }

    /// Look up an active consumer.
    pub fn consumer_mut(&mut self, consumer_id: ConsumerId) -> Option<&mut AmqpConsumer> {
        self.consumers.get_mut(&consumer_id)
    }

    /// Look up an active producer.
    pub fn producer(&self, producer_id: ProducerId) -> Option<&AmqpProducer> {
        self.producers.get(&producer_id)
    }

    /// Resolve every request still staged on a pending link. The session is
    /// going away and no later poll will reconcile them.
    fn abort_pending_links(&mut self, cause: &ProviderError) {
        for mut link in self.pending_open_links.drain(..) {
            warn!(?link, %cause, "failing link still pending at session teardown");
            link.failed(cause.clone());
        }
        for mut link in self.pending_close_links.drain(..) {
            link.failed(cause.clone());
        }
    }

    fn process_pending_links(&mut self) {
        if self.pending_open_links.is_empty() && self.pending_close_links.is_empty() {
            return;
        }

        // Two-phase: drain the list, re-collect whatever is still pending.
        let candidates = std::mem::take(&mut self.pending_open_links);
        for mut link in candidates {
            trace!(?link, open = link.is_open(), "checking pending link");
            if link.is_open() {
                link.opened();
                if link.state() == ResourceState::Closing {
                    // transient send link, already tearing itself down
                    self.pending_close_links.push(link);
                    continue;
                }
                debug!(?link, "link is now open");
                match link {
                    AmqpLink::Producer(producer) => {
                        self.producers.insert(producer.info().id, producer);
                    }
                    AmqpLink::Consumer(consumer) => {
                        self.consumers.insert(consumer.info().id, consumer);
                    }
                }
            } else if link.is_closed() {
                let cause = link.remote_error();
                warn!(?link, %cause, "open of link failed");
                link.failed(cause);
            } else {
                self.pending_open_links.push(link);
            }
        }

        let candidates = std::mem::take(&mut self.pending_close_links);
        for mut link in candidates {
            if link.is_closed() {
                link.closed();
            } else {
                self.pending_close_links.push(link);
            }
        }
    }
}

impl AmqpResource for AmqpSession {
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
        if !self.pending_open_links.is_empty() || !self.pending_close_links.is_empty() {
            let cause = ProviderError::remotely_closed(
                None,
                None,
                "Session was closed before the link request completed.",
            );
            self.abort_pending_links(&cause);
        }
    }

    fn failed(&mut self, cause: ProviderError) {
        self.abort_pending_links(&cause);
        self.lifecycle.on_failed(cause, &self.events);
    }

    /// Called from the parent connection to react to link state changes in
    /// the underlying transport.
    fn process_updates(&mut self) {
        self.process_pending_links();

        // Producers settle before consumer redelivery state is consulted.
        let mut terminal = Vec::new();
        for (id, producer) in self.producers.iter_mut() {
            producer.process_updates();
            if producer.state().is_terminal() {
                terminal.push(*id);
            }
        }
        for id in terminal {
            info!(%id, "reaping terminal producer");
            self.producers.remove(&id);
        }

        let mut terminal = Vec::new();
        for (id, consumer) in self.consumers.iter_mut() {
            consumer.process_updates();
            if consumer.state().is_terminal() {
                terminal.push(*id);
            }
        }
        for id in terminal {
            info!(%id, "reaping terminal consumer");
            self.consumers.remove(&id);
        }

        // The peer ended an active session the application never closed.
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
