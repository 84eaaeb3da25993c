//! Sizing of the dispatch queue and the priority bands of routed work.

use serde::Deserialize;
use static_assertions::const_assert;
use tokio::sync::Semaphore;

use super::DispatchError;

/// Default band for calls, responses and errors.
pub const DEFAULT_RPC_PRIORITY: i32 = 3000;
/// Default band for events.
pub const DEFAULT_EVENT_PRIORITY: i32 = 2000;
/// Default band for stream chunks.
pub const DEFAULT_CHUNK_PRIORITY: i32 = 1000;

// Calls preempt events, which preempt chunks.
const_assert!(DEFAULT_RPC_PRIORITY > DEFAULT_EVENT_PRIORITY);
const_assert!(DEFAULT_EVENT_PRIORITY > DEFAULT_CHUNK_PRIORITY);

/// Largest accepted queue capacity; one semaphore permit backs each slot.
pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// Capacity and worker count of a [`PriorityDispatchQueue`].
///
/// Both fields are required; there is no sensible default for either.
///
/// [`PriorityDispatchQueue`]: super::PriorityDispatchQueue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ParallelQueueOptions {
    /// Largest number of outstanding items, pending and running together.
    pub capacity: usize,
    /// Number of worker tasks draining the queue.
    pub threads: usize,
}

impl ParallelQueueOptions {
    /// Build validated options.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] if either value is zero or
    /// `capacity` exceeds [`MAX_CAPACITY`].
    pub fn new(capacity: usize, threads: usize) -> Result<Self, DispatchError> {
        let options = Self { capacity, threads };
        options.validate()?;
        Ok(options)
    }

    /// Check that both values are at least one and `capacity` is at most
    /// [`MAX_CAPACITY`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] otherwise.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY || self.threads == 0 {
            return Err(DispatchError::InvalidConfig {
                capacity: self.capacity,
                threads: self.threads,
            });
        }
        Ok(())
    }
}

/// Priority band assigned to each class of inbound work.
///
/// Higher numbers run first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessagePriorityOptions {
    /// Calls.
    pub rpc: i32,
    /// Events.
    pub event: i32,
    /// Stream chunks.
    pub chunk: i32,
}

impl Default for MessagePriorityOptions {
    fn default() -> Self {
        Self {
            rpc: DEFAULT_RPC_PRIORITY,
            event: DEFAULT_EVENT_PRIORITY,
            chunk: DEFAULT_CHUNK_PRIORITY,
        }
    }
}
