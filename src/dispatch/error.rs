//! Error types for work submission and execution.

use thiserror::Error;

use crate::message::ErrorCode;

/// Errors returned when submitting work.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// Every slot is taken by a pending or running item.
    #[error("dispatch queue full ({capacity} outstanding items)")]
    QueueFull {
        /// Configured capacity.
        capacity: usize,
    },
    /// The queue has begun shutting down.
    #[error("dispatch queue is shutting down")]
    ShuttingDown,
    /// The queue options were rejected.
    #[error("invalid queue options; capacity={capacity}, threads={threads}; both must be >= 1 and capacity <= {max}", max = super::MAX_CAPACITY)]
    InvalidConfig {
        /// Configured capacity.
        capacity: usize,
        /// Configured worker count.
        threads: usize,
    },
}

/// Failure reported by a work item.
///
/// The code travels back to a remote caller unchanged when the item served
/// a call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct WorkError {
    code: ErrorCode,
    message: String,
}

impl WorkError {
    /// Unclassified failure.
    pub fn new(message: impl Into<String>) -> Self { Self::with_code(ErrorCode::GENERIC, message) }

    /// Failure with an explicit code.
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Classification of the failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode { self.code }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }
}
