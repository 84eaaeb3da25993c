//! Priority dispatch of inbound work.
//!
//! The connection reader must never wait on application code, so calls,
//! events and stream chunks are handed to a [`PriorityDispatchQueue`] and
//! executed by a fixed pool of workers. The queue is bounded; a full queue
//! rejects work instead of growing, leaving the caller to decide whether to
//! wait, drop or answer "busy".
//!
//! Each job receives a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! and reports through its [`WorkHandle`]. Failures and panics are confined to
//! the item that raised them.

pub mod config;
pub mod error;
mod handle;
mod queue;

pub use config::{
    DEFAULT_CHUNK_PRIORITY,
    DEFAULT_EVENT_PRIORITY,
    DEFAULT_RPC_PRIORITY,
    MAX_CAPACITY,
    MessagePriorityOptions,
    ParallelQueueOptions,
};
pub use error::{DispatchError, WorkError};
pub use handle::{WorkHandle, WorkOutcome};
pub use queue::{PriorityDispatchQueue, ShutdownMode};

#[cfg(test)]
mod tests;
