//! Heartbeat thresholds.

use std::time::Duration;

use serde::Deserialize;

/// Default time the peer may stay silent.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(1);

/// Local and peer silence thresholds.
///
/// A zero `timeout` disables the monitor entirely, including peer
/// enforcement: a side that never announces itself does not demand proof of
/// life from the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeepAliveOptions {
    /// Longest local silence before a heartbeat is sent.
    pub timeout: Duration,
    /// Longest peer silence before the peer is declared dead.
    pub peer_timeout: Duration,
}

impl Default for KeepAliveOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        }
    }
}

impl KeepAliveOptions {
    /// Set the local silence threshold.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the peer silence threshold.
    #[must_use]
    pub const fn with_peer_timeout(mut self, peer_timeout: Duration) -> Self {
        self.peer_timeout = peer_timeout;
        self
    }

    /// Whether heartbeats and peer checks are active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool { !self.timeout.is_zero() }
}
