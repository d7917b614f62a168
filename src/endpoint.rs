//! Trait abstraction of the transport-level Connection, Session and Link
//! endpoints
//!
//! The engine never performs I/O or framing itself. It observes each
//! endpoint's local and remote state, plus the remote error condition the
//! peer attached to its last state transition, and requests local open/close
//! transitions. The transport implementation behind these traits is free to
//! batch, pipeline or defer the actual frames; the engine only reacts to the
//! observable state during [`process_updates`](crate::AmqpResource::process_updates).

use std::fmt;

use bytes::Bytes;

use crate::meta::AckMode;

/// Observable state of one side of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// No open/attach has been observed yet
    Uninitialized,
    /// The endpoint is open on this side
    Active,
    /// The endpoint has been closed on this side
    Closed,
}

/// Error condition a peer attached to an endpoint state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCondition {
    /// Symbolic condition code (e.g. `amqp:not-found`)
    pub condition: Option<String>,
    /// Human readable description supplied by the peer
    pub description: Option<String>,
}

/// Common observable surface of every transport endpoint.
pub trait Endpoint: fmt::Debug {
    /// State of the local side of this endpoint
    fn local_state(&self) -> EndpointState;

    /// Last observed state of the remote side of this endpoint
    fn remote_state(&self) -> EndpointState;

    /// Error condition the peer attached when moving its side away from
    /// active, if any
    fn remote_condition(&self) -> Option<RemoteCondition>;

    /// Request that the local side of this endpoint be opened
    fn open(&mut self);

    /// Request that the local side of this endpoint be closed
    fn close(&mut self);
}

/// Transport endpoint backing an [`AmqpConnection`](crate::AmqpConnection).
pub trait ConnectionEndpoint: Endpoint {
    /// Set the container-id carried in the local open
    fn set_container_id(&mut self, container_id: &str);

    /// Set the hostname carried in the local open
    fn set_hostname(&mut self, hostname: &str);

    /// Allocate a new session endpoint nested in this connection
    fn begin_session(&mut self) -> Box<dyn SessionEndpoint>;
}

/// Transport endpoint backing an [`AmqpSession`](crate::AmqpSession).
pub trait SessionEndpoint: Endpoint {
    /// Allocate a sender link endpoint addressed to `address`
    fn attach_sender(&mut self, address: &str) -> Box<dyn LinkEndpoint>;

    /// Allocate a receiver link endpoint addressed to `address` with the
    /// given initial credit
    fn attach_receiver(&mut self, address: &str, credit: u32) -> Box<dyn LinkEndpoint>;
}

/// Transport endpoint backing a single link (producer or consumer).
pub trait LinkEndpoint: Endpoint {
    /// Transfer one message payload over the link
    fn send(&mut self, payload: Bytes);

    /// Apply the given acknowledgement policy to the deliveries currently
    /// held by the link
    fn acknowledge(&mut self, mode: AckMode);
}
