//! Producer and consumer links
//!
//! Links are the leaves of the resource tree. Both kinds share one pending
//! list on their owning session, so they are carried through the pending
//! open/close phases as a tagged union and only split back into the
//! session's producer/consumer maps on promotion.

use crate::error::ProviderError;
use crate::resource::{AmqpResource, ResourceState};

mod consumer;
mod producer;

pub use consumer::AmqpConsumer;
pub use producer::AmqpProducer;

/// A link awaiting remote confirmation of its open or close.
#[derive(Debug)]
pub(crate) enum AmqpLink {
    Producer(AmqpProducer),
    Consumer(AmqpConsumer),
}

impl AmqpLink {
    pub(crate) fn state(&self) -> ResourceState {
        match self {
            AmqpLink::Producer(producer) => producer.state(),
            AmqpLink::Consumer(consumer) => consumer.state(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        match self {
            AmqpLink::Producer(producer) => producer.is_open(),
            AmqpLink::Consumer(consumer) => consumer.is_open(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        match self {
            AmqpLink::Producer(producer) => producer.is_closed(),
            AmqpLink::Consumer(consumer) => consumer.is_closed(),
        }
    }

    pub(crate) fn opened(&mut self) {
        match self {
            AmqpLink::Producer(producer) => producer.opened(),
            AmqpLink::Consumer(consumer) => consumer.opened(),
        }
    }

    pub(crate) fn closed(&mut self) {
        match self {
            AmqpLink::Producer(producer) => producer.closed(),
            AmqpLink::Consumer(consumer) => consumer.closed(),
        }
    }

    pub(crate) fn failed(&mut self, cause: ProviderError) {
        match self {
            AmqpLink::Producer(producer) => producer.failed(cause),
            AmqpLink::Consumer(consumer) => consumer.failed(cause),
        }
    }

    pub(crate) fn remote_error(&self) -> ProviderError {
        match self {
            AmqpLink::Producer(producer) => producer.remote_error(),
            AmqpLink::Consumer(consumer) => consumer.remote_error(),
        }
    }
}
