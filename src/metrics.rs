//! Metric helpers for `rpcwire`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. Without the
//! `metrics` feature every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "rpcwire_connections_active";
/// Name of the counter tracking framed messages.
pub const MESSAGES_TOTAL: &str = "rpcwire_messages_total";
/// Name of the counter tracking malformed inbound messages.
pub const PROTOCOL_ERRORS_TOTAL: &str = "rpcwire_protocol_errors_total";
/// Name of the gauge tracking queued and running work items.
pub const WORK_OUTSTANDING: &str = "rpcwire_work_outstanding";
/// Name of the counter tracking finished work items by outcome.
pub const WORK_TOTAL: &str = "rpcwire_work_total";
/// Name of the counter tracking work refused for lack of capacity.
pub const WORK_REJECTED_TOTAL: &str = "rpcwire_work_rejected_total";
/// Name of the gauge tracking live stream scopes.
pub const STREAMS_OPEN: &str = "rpcwire_streams_open";
/// Name of the counter tracking stream chunks.
pub const STREAM_CHUNKS_TOTAL: &str = "rpcwire_stream_chunks_total";
/// Name of the counter tracking heartbeats emitted.
pub const HEARTBEATS_SENT_TOTAL: &str = "rpcwire_heartbeats_sent_total";
/// Name of the counter tracking peers declared dead.
pub const LIVENESS_FAILURES_TOTAL: &str = "rpcwire_liveness_failures_total";

/// Direction of message processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Messages received from the peer.
    Inbound,
    /// Messages sent to the peer.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a framed message for the given direction.
pub fn inc_messages(direction: Direction, kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_TOTAL, "direction" => direction.as_str(), "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (direction, kind);
}

/// Record a malformed inbound message.
pub fn inc_protocol_errors() {
    #[cfg(feature = "metrics")]
    counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
}

/// Record a work item entering the dispatch queue.
pub fn inc_work_outstanding() {
    #[cfg(feature = "metrics")]
    gauge!(WORK_OUTSTANDING).increment(1.0);
}

/// Record a work item leaving the dispatch queue with `outcome`.
pub fn finish_work(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    {
        gauge!(WORK_OUTSTANDING).decrement(1.0);
        counter!(WORK_TOTAL, "outcome" => outcome).increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record a work item refused by the dispatch queue.
pub fn inc_work_rejected() {
    #[cfg(feature = "metrics")]
    counter!(WORK_REJECTED_TOTAL).increment(1);
}

/// Increment the open streams gauge.
pub fn inc_open_streams() {
    #[cfg(feature = "metrics")]
    gauge!(STREAMS_OPEN).increment(1.0);
}

/// Decrement the open streams gauge.
pub fn dec_open_streams() {
    #[cfg(feature = "metrics")]
    gauge!(STREAMS_OPEN).decrement(1.0);
}

/// Record a stream chunk for the given direction.
pub fn inc_chunks(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(STREAM_CHUNKS_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an emitted heartbeat.
pub fn inc_heartbeats() {
    #[cfg(feature = "metrics")]
    counter!(HEARTBEATS_SENT_TOTAL).increment(1);
}

/// Record a peer declared dead.
pub fn inc_liveness_failures() {
    #[cfg(feature = "metrics")]
    counter!(LIVENESS_FAILURES_TOTAL).increment(1);
}
