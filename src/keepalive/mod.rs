//! Bidirectional liveness detection.
//!
//! [`KeepAliveMonitor`] keeps two clocks per connection: when this side last
//! sent anything and when the peer last did. Every message counts, so a busy
//! connection never needs heartbeats. A periodic check sends a heartbeat
//! after `timeout` of local silence and declares the peer dead after
//! `peer_timeout` of peer silence.

pub mod config;
mod monitor;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use config::{DEFAULT_PEER_TIMEOUT, KeepAliveOptions};
pub use monitor::{KeepAliveAction, KeepAliveMonitor, KeepAliveState};

use crate::message::Message;

/// The peer stopped sending traffic.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LivenessError {
    /// Nothing arrived from the peer for longer than `peer_timeout`.
    #[error("peer silent for {silent_for:?}")]
    PeerTimedOut {
        /// Time since the last inbound message.
        silent_for: Duration,
    },
}

/// Returned by a [`HeartbeatSink`] whose connection has gone away.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("heartbeat sink closed")]
pub struct SinkClosed;

/// Destination for heartbeats emitted by [`KeepAliveMonitor::run`].
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    /// Queue one heartbeat for sending.
    async fn send_heartbeat(&self) -> Result<(), SinkClosed>;
}

#[async_trait]
impl HeartbeatSink for mpsc::Sender<Message> {
    async fn send_heartbeat(&self) -> Result<(), SinkClosed> {
        self.send(Message::Heartbeat).await.map_err(|_| SinkClosed)
    }
}
