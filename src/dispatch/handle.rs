//! Observer side of a submitted work item.

use derive_more::Display;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::WorkError;

/// How a work item finished.
#[derive(Clone, Debug, PartialEq, Eq, Display)]
pub enum WorkOutcome {
    /// The job returned `Ok`.
    #[display("completed")]
    Completed,
    /// The job returned an error.
    #[display("failed: {_0}")]
    Failed(WorkError),
    /// The job panicked; carries the panic message.
    #[display("panicked: {_0}")]
    Panicked(String),
    /// The item was cancelled before or while running.
    #[display("cancelled")]
    Cancelled,
}

impl WorkOutcome {
    pub(crate) const fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Panicked(_) => "panicked",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Handle returned for every accepted work item.
///
/// Dropping the handle does not cancel the item.
#[derive(Debug)]
pub struct WorkHandle {
    pub(super) token: CancellationToken,
    pub(super) outcome: oneshot::Receiver<WorkOutcome>,
    pub(super) priority: i32,
}

impl WorkHandle {
    /// Request cancellation.
    ///
    /// An item that has not started is skipped; a running item sees its
    /// token cancelled and may stop at its next check.
    pub fn cancel(&self) { self.token.cancel(); }

    /// Token observed by the item.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken { self.token.clone() }

    /// Priority the item was submitted with.
    #[must_use]
    pub const fn priority(&self) -> i32 { self.priority }

    /// Wait for the item to finish.
    pub async fn outcome(self) -> WorkOutcome {
        self.outcome.await.unwrap_or(WorkOutcome::Cancelled)
    }
}
