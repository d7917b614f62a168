//! Error types shared across the provider engine

/// Errors produced while driving provider resources through their lifecycle.
///
/// The variants follow the failure taxonomy of the engine:
///
/// - [`Security`](ProviderError::Security) is raised when SASL negotiation is
///   rejected and is always fatal to the whole connection
/// - [`RemotelyClosed`](ProviderError::RemotelyClosed) covers both an open
///   that the peer rejected and an already-active resource the peer tore
///   down, carrying whatever condition/description the peer supplied
/// - [`InvalidConfiguration`](ProviderError::InvalidConfiguration) and
///   [`IllegalState`](ProviderError::IllegalState) are local-only errors and
///   are surfaced synchronously at the offending call, never deferred into a
///   `process_updates` pass
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// SASL negotiation was rejected by the remote peer
    #[error("SASL authentication failed: {0}")]
    Security(String),

    /// The remote peer closed the resource, either rejecting its open or
    /// tearing it down after it had become active
    #[error("{description}")]
    RemotelyClosed {
        /// Symbolic error condition supplied by the peer, if any
        condition: Option<String>,
        /// Human readable description, falling back to a generic message
        /// when the peer supplied none
        description: String,
    },

    /// Locally detected configuration problem (e.g. an empty broker URI)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The operation is not valid in the resource's current state
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),
}

impl ProviderError {
    pub(crate) fn remotely_closed(
        condition: Option<String>,
        description: Option<String>,
        fallback: &str,
    ) -> Self {
        let description = match description {
            Some(desc) if !desc.is_empty() => desc,
            _ => fallback.to_string(),
        };
        Self::RemotelyClosed {
            condition,
            description,
        }
    }
}
