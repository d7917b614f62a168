//! Request/result correlation and the provider event channel

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::ProviderError;

/// Receiving half of an [`AsyncResult`]; resolves once the engine completes
/// or fails the originating request.
pub type ResultReceiver = oneshot::Receiver<Result<(), ProviderError>>;

/// Correlation handle for one outstanding asynchronous request.
///
/// Exactly one of [`complete`](AsyncResult::complete) or
/// [`fail`](AsyncResult::fail) resolves the request; whichever is invoked
/// first consumes the underlying channel. Any later invocation of either is
/// an idempotent no-op, which tolerates duplicate remote signals. A caller
/// that abandoned its [`ResultReceiver`] (e.g. after its own timeout) makes
/// a late completion a no-op as well.
#[derive(Debug)]
pub struct AsyncResult {
    sender: Option<oneshot::Sender<Result<(), ProviderError>>>,
}

impl AsyncResult {
    /// Creates a new request handle together with the receiver the caller
    /// waits on.
    pub fn new() -> (Self, ResultReceiver) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Resolves the request successfully.
    pub fn complete(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Ok(()));
        }
    }

    /// Resolves the request with `cause`.
    pub fn fail(&mut self, cause: ProviderError) {
        if let Some(sender) = self.sender.take() {
            trace!(%cause, "failing pending request");
            let _ = sender.send(Err(cause));
        }
    }

    /// Whether the request has already been resolved.
    pub fn is_complete(&self) -> bool {
        self.sender.is_none()
    }
}

/// Out-of-band notifications delivered to the owning provider.
#[derive(Debug)]
pub enum ProviderEvent {
    /// A resource failed while no application request was waiting on it,
    /// e.g. the peer tore down an active connection
    UnsolicitedError(ProviderError),
}

/// Sending half of the provider event channel, cloned into every resource.
pub(crate) type EventSender = mpsc::UnboundedSender<ProviderEvent>;

/// Receiving half handed to the provider when the connection is built.
pub type EventReceiver = mpsc::UnboundedReceiver<ProviderEvent>;

#[cfg(test)]
mod tests {
    use futures_util::poll;

    use super::AsyncResult;
    use crate::error::ProviderError;

    #[tokio::test]
    async fn test_complete_resolves_receiver() {
        let (mut result, receiver) = AsyncResult::new();
        assert!(!result.is_complete());
        result.complete();
        assert!(result.is_complete());
        assert_eq!(receiver.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_fail_resolves_receiver_with_cause() {
        let (mut result, receiver) = AsyncResult::new();
        result.fail(ProviderError::IllegalState("boom"));
        assert_eq!(
            receiver.await.unwrap(),
            Err(ProviderError::IllegalState("boom"))
        );
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_noop() {
        let (mut result, receiver) = AsyncResult::new();
        result.complete();
        result.fail(ProviderError::IllegalState("ignored"));
        result.complete();
        assert_eq!(receiver.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_receiver_pending_until_completed() {
        let (mut result, mut receiver) = AsyncResult::new();
        assert!(poll!(&mut receiver).is_pending());
        result.complete();
        assert!(poll!(&mut receiver).is_ready());
    }

    #[test]
    fn test_late_completion_after_abandoned_receiver_is_noop() {
        let (mut result, receiver) = AsyncResult::new();
        drop(receiver);
        result.complete();
        assert!(result.is_complete());
    }
}
