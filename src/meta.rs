//! Immutable identity and configuration records handed in by the façade
//! layer when resources are created

use std::fmt;

use bytes::Bytes;
use url::Url;

use crate::sasl::SaslProfile;

/// Identifier of a session within its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Identifier of a producer within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProducerId(pub u64);

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "producer:{}", self.0)
    }
}

/// Identifier of a consumer within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer:{}", self.0)
    }
}

/// Kind of a messaging destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    /// Point-to-point queue
    Queue,
    /// Publish/subscribe topic
    Topic,
}

/// A messaging destination as named by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Application-supplied name
    pub name: String,
    /// Queue or topic
    pub kind: DestinationKind,
    /// Temporary destinations carry peer-assigned addresses and are never
    /// re-prefixed
    pub temporary: bool,
}

impl Destination {
    /// A non-temporary queue named `name`.
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
            temporary: false,
        }
    }

    /// A non-temporary topic named `name`.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
            temporary: false,
        }
    }

    /// Marks this destination as temporary.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }
}

/// Immutable connection identity and configuration, shared read-only with
/// every session for destination-name qualification.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Container id announced in the local open
    pub container_id: String,
    /// Broker address
    pub remote_url: Url,
    /// Prefix prepended to non-temporary queue names
    pub queue_prefix: String,
    /// Prefix prepended to non-temporary topic names
    pub topic_prefix: String,
    /// SASL configuration, if authentication was requested
    pub sasl_profile: Option<SaslProfile>,
}

/// Immutable session identity.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session identifier assigned by the façade
    pub id: SessionId,
}

/// Immutable producer identity and configuration.
#[derive(Debug, Clone)]
pub struct ProducerInfo {
    /// Producer identifier assigned by the façade
    pub id: ProducerId,
    /// Fixed target destination; `None` makes the producer anonymous
    pub destination: Option<Destination>,
}

/// Immutable consumer identity and configuration.
#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    /// Consumer identifier assigned by the façade
    pub id: ConsumerId,
    /// Source destination
    pub destination: Destination,
    /// Link credit granted to the remote peer up front
    pub prefetch: u32,
}

/// One outbound message send as dispatched by the façade.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    /// Target destination for this message
    pub destination: Destination,
    /// Already-encoded message body
    pub payload: Bytes,
}

/// Acknowledgement policy applied to deliveries held by a consumer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Settle the deliveries as accepted
    Accepted,
    /// Return the deliveries for redelivery
    Released,
    /// Settle the deliveries as rejected
    Rejected,
}
