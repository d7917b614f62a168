//! Resource lifecycle contract shared by connection, session and links
//!
//! Every protocol resource walks the same state machine:
//!
//! ```text
//! Unopened -> Opening -> Opened -> Closing -> Closed
//!                |          |         |
//!                +----------+---------+--> Failed
//! ```
//!
//! `Failed` is absorbing. A failed resource accepts no further open/close
//! work and must be discarded by its parent, never reused.

use tracing::{trace, warn};

use crate::error::ProviderError;
use crate::provider::{AsyncResult, EventSender, ProviderEvent};

/// Lifecycle state of a protocol resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Created locally, open not yet requested
    Unopened,
    /// Open requested locally, awaiting remote confirmation
    Opening,
    /// Confirmed active by the remote peer
    Opened,
    /// Close requested locally, awaiting remote confirmation
    Closing,
    /// Confirmed closed by the remote peer
    Closed,
    /// Terminally failed
    Failed,
}

impl ResourceState {
    /// Whether the resource reached a terminal state and should be reaped
    /// by its parent.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResourceState::Closed | ResourceState::Failed)
    }
}

/// Lifecycle operations implemented by every protocol resource.
///
/// `open`/`close` record local intent and the request to complete once the
/// remote peer confirms; `opened`/`closed`/`failed` deliver that
/// confirmation. `process_updates` is polled by the parent whenever the
/// transport reports new remote data and must be idempotent: calling it
/// twice with no intervening remote change produces no additional
/// transitions or completions.
pub trait AmqpResource {
    /// Current lifecycle state
    fn state(&self) -> ResourceState;

    /// Whether the remote peer reports this resource's endpoint as active
    fn is_open(&self) -> bool;

    /// Whether the remote peer reports this resource's endpoint as closed
    fn is_closed(&self) -> bool;

    /// Perform the work needed to open this resource and store `request`
    /// until the remote peer confirms the resource became active
    fn open(&mut self, request: AsyncResult) -> Result<(), ProviderError>;

    /// The remote peer confirmed this resource as active
    fn opened(&mut self);

    /// Perform the work needed to close this resource and store `request`
    /// until the remote peer confirms the close
    fn close(&mut self, request: AsyncResult) -> Result<(), ProviderError>;

    /// The remote peer confirmed this resource as closed
    fn closed(&mut self);

    /// Move this resource to the terminal failed state, resolving whichever
    /// request is outstanding with `cause`
    fn failed(&mut self, cause: ProviderError);

    /// Reconcile pending local intent against newly observed remote state
    fn process_updates(&mut self);

    /// Error derived from the endpoint's remote condition, with a generic
    /// fallback when the peer supplied no description
    fn remote_error(&self) -> ProviderError;
}

/// State tracker embedded in each concrete resource.
///
/// Holds at most one outstanding request at a time and guarantees that each
/// request is resolved exactly once.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: ResourceState,
    open_request: Option<AsyncResult>,
    close_request: Option<AsyncResult>,
    failure_cause: Option<ProviderError>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: ResourceState::Unopened,
            open_request: None,
            close_request: None,
            failure_cause: None,
        }
    }

    pub(crate) fn state(&self) -> ResourceState {
        self.state
    }

    pub(crate) fn failure_cause(&self) -> Option<&ProviderError> {
        self.failure_cause.as_ref()
    }

    /// `Unopened -> Opening`, storing the request to resolve on remote
    /// confirmation.
    pub(crate) fn begin_open(&mut self, request: AsyncResult) -> Result<(), ProviderError> {
        match self.state {
            ResourceState::Unopened => {
                self.state = ResourceState::Opening;
                self.open_request = Some(request);
                Ok(())
            }
            _ => Err(ProviderError::IllegalState(
                "open is only valid on an unopened resource",
            )),
        }
    }

    /// `Opened -> Closing` (or `Opening -> Closing` when the close
    /// supersedes an open that never completed, failing the open request).
    pub(crate) fn begin_close(&mut self, request: AsyncResult) -> Result<(), ProviderError> {
        match self.state {
            ResourceState::Opened => {}
            ResourceState::Opening => {
                if let Some(mut open_request) = self.open_request.take() {
                    open_request.fail(ProviderError::IllegalState(
                        "resource was closed before its open completed",
                    ));
                }
            }
            _ => {
                return Err(ProviderError::IllegalState(
                    "close is only valid on an open or opening resource",
                ))
            }
        }
        self.state = ResourceState::Closing;
        self.close_request = Some(request);
        Ok(())
    }

    /// `Opening -> Opened`, resolving the pending open request. No-op in any
    /// other state.
    pub(crate) fn on_opened(&mut self) {
        if self.state != ResourceState::Opening {
            return;
        }
        self.state = ResourceState::Opened;
        if let Some(mut request) = self.open_request.take() {
            request.complete();
        }
    }

    /// `Closing -> Closed`, resolving the pending close request. Also
    /// accepts `Opened -> Closed` for a clean remote close the application
    /// never requested; there is no request to resolve in that case.
    pub(crate) fn on_closed(&mut self) {
        match self.state {
            ResourceState::Closing | ResourceState::Opened => {}
            _ => return,
        }
        self.state = ResourceState::Closed;
        if let Some(mut request) = self.close_request.take() {
            request.complete();
        }
    }

    /// Transition to `Failed`, resolving whichever request is outstanding
    /// with `cause`. With no outstanding request the failure is unsolicited
    /// and is surfaced on the provider event channel instead. No-op once the
    /// resource is already terminal.
    pub(crate) fn on_failed(&mut self, cause: ProviderError, events: &EventSender) {
        if self.state.is_terminal() {
            trace!(%cause, "ignoring failure on terminal resource");
            return;
        }
        self.state = ResourceState::Failed;
        self.failure_cause = Some(cause.clone());

        if let Some(mut request) = self.open_request.take() {
            request.fail(cause);
        } else if let Some(mut request) = self.close_request.take() {
            request.fail(cause);
        } else {
            warn!(%cause, "unsolicited resource failure");
            let _ = events.send(ProviderEvent::UnsolicitedError(cause));
        }
    }
}
