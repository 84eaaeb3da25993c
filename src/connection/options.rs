//! Per-connection configuration.

use serde::Deserialize;

use super::ConnectionError;
use crate::{
    dispatch::{MessagePriorityOptions, ParallelQueueOptions},
    keepalive::KeepAliveOptions,
    message::{DEFAULT_MAX_FRAME_LENGTH, ProtocolVersion},
    stream::StreamScopeOptions,
};

/// Default number of messages buffered for the writer task.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

fn default_max_frame_length() -> usize { DEFAULT_MAX_FRAME_LENGTH }

fn default_outbound_capacity() -> usize { DEFAULT_OUTBOUND_CAPACITY }

/// Everything a [`Connection`](super::Connection) needs to start.
///
/// Only the dispatch queue sizing is required; every other section falls back
/// to its own defaults when absent from a configuration source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ConnectionOptions {
    /// Version written by this side and the highest version it reads.
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    /// Largest frame body accepted or written.
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
    /// Messages buffered between producers and the writer task.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Heartbeat thresholds; disabled by default.
    #[serde(default)]
    pub keepalive: KeepAliveOptions,
    /// Options of outbound streams and of inbound streams the peer opens.
    #[serde(default)]
    pub streams: StreamScopeOptions,
    /// Dispatch bands of inbound calls, events and chunks.
    #[serde(default)]
    pub priorities: MessagePriorityOptions,
    /// Sizing of the inbound work queue.
    pub queue: ParallelQueueOptions,
}

impl ConnectionOptions {
    /// Options with defaults everywhere except the dispatch queue.
    #[must_use]
    pub fn new(queue: ParallelQueueOptions) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            keepalive: KeepAliveOptions::default(),
            streams: StreamScopeOptions::default(),
            priorities: MessagePriorityOptions::default(),
            queue,
        }
    }

    /// Speak `version` instead of the newest one.
    #[must_use]
    pub const fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Set the largest frame body in either direction.
    #[must_use]
    pub const fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    /// Set how many messages may wait for the writer.
    #[must_use]
    pub const fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Enable or tune heartbeats.
    #[must_use]
    pub const fn with_keepalive(mut self, keepalive: KeepAliveOptions) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Replace the default stream options.
    #[must_use]
    pub const fn with_streams(mut self, streams: StreamScopeOptions) -> Self {
        self.streams = streams;
        self
    }

    /// Replace the dispatch bands.
    #[must_use]
    pub const fn with_priorities(mut self, priorities: MessagePriorityOptions) -> Self {
        self.priorities = priorities;
        self
    }

    /// Check values that deserialization cannot rule out.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidOptions`] for an unsupported protocol
    /// version or a zero frame limit or outbound capacity, and
    /// [`ConnectionError::Dispatch`] for invalid queue sizing.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if ProtocolVersion::new(self.protocol_version.get()).is_none() {
            return Err(ConnectionError::InvalidOptions("unsupported protocol version"));
        }
        if self.max_frame_length == 0 {
            return Err(ConnectionError::InvalidOptions("max_frame_length must be positive"));
        }
        if self.outbound_capacity == 0 {
            return Err(ConnectionError::InvalidOptions("outbound_capacity must be positive"));
        }
        self.queue.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::dispatch::DispatchError;

    fn queue() -> ParallelQueueOptions { ParallelQueueOptions::new(4, 2).expect("valid queue") }

    #[test]
    fn defaults_are_valid() {
        let options = ConnectionOptions::new(queue());
        assert_eq!(options.protocol_version, ProtocolVersion::CURRENT);
        assert_eq!(options.outbound_capacity, DEFAULT_OUTBOUND_CAPACITY);
        assert!(options.validate().is_ok());
    }

    #[rstest]
    #[case::zero_frame(ConnectionOptions::new(queue()).with_max_frame_length(0))]
    #[case::zero_outbound(ConnectionOptions::new(queue()).with_outbound_capacity(0))]
    fn zero_limits_are_rejected(#[case] options: ConnectionOptions) {
        assert!(matches!(
            options.validate(),
            Err(ConnectionError::InvalidOptions(_))
        ));
    }

    #[test]
    fn queue_sizing_is_checked() {
        let options = ConnectionOptions::new(ParallelQueueOptions {
            capacity: 0,
            threads: 1,
        });
        assert!(matches!(
            options.validate(),
            Err(ConnectionError::Dispatch(DispatchError::InvalidConfig { .. }))
        ));
    }
}
