//! Client-side resource lifecycle engine for a session-oriented messaging
//! API over AMQP 1.0.
//!
//! This crate owns the state machine tracking connections, sessions and
//! links as asynchronous open/close requests are issued locally and
//! confirmed (or rejected) by the remote peer. It performs no I/O and no
//! framing: the transport behind the [`endpoint`] traits delivers frames
//! and surfaces endpoint state, and the provider's event loop calls
//! [`AmqpResource::process_updates`] on the [`AmqpConnection`] whenever
//! something changed remotely. Each pass reconciles the connection (SASL
//! first), then its pending sessions, then recurses into every session's
//! pending links, which is what guarantees a child resource is never
//! promoted before its parent.
//!
//! All state transitions happen on the single thread driving
//! `process_updates`. The only cross-thread boundary is [`AsyncResult`]
//! completion, which the application may observe from another thread.

// Public mods
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod meta;
pub mod provider;
pub mod resource;
pub mod sasl;
pub mod session;

#[cfg(test)]
pub(crate) mod testkit;

pub use connection::{AmqpConnection, Builder};
pub use error::ProviderError;
pub use link::{AmqpConsumer, AmqpProducer};
pub use provider::{AsyncResult, EventReceiver, ProviderEvent, ResultReceiver};
pub use resource::{AmqpResource, ResourceState};
pub use session::AmqpSession;
