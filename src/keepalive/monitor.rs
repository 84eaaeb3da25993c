//! Activity clocks and the heartbeat loop of one connection.
//!
//! [`KeepAliveMonitor::poll`] is a pure step over the two clocks;
//! [`KeepAliveMonitor::run`] drives it from a tokio interval.

use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use derive_more::Display;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{HeartbeatSink, KeepAliveOptions, LivenessError};
use crate::metrics;

const MIN_TICK: Duration = Duration::from_millis(1);

/// Lifecycle of a [`KeepAliveMonitor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum KeepAliveState {
    /// Disabled because the local timeout is zero.
    Idle,
    /// Checking both clocks.
    Armed,
    /// The peer timed out. Terminal.
    Failed,
}

/// What the owner should do after a [`KeepAliveMonitor::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepAliveAction {
    /// Both sides are within their thresholds.
    Nothing,
    /// Local silence exceeded `timeout`; send a heartbeat.
    SendHeartbeat,
    /// Peer silence exceeded `peer_timeout`; tear the connection down.
    PeerTimedOut {
        /// Time since the last inbound message.
        silent_for: Duration,
    },
}

/// Per-connection activity clocks.
///
/// Timestamps are nanoseconds since the monitor was created, held in atomics
/// so any task touching the connection can record traffic.
#[derive(Debug)]
pub struct KeepAliveMonitor {
    options: KeepAliveOptions,
    epoch: Instant,
    last_local: AtomicU64,
    last_peer: AtomicU64,
    failed: AtomicBool,
}

impl KeepAliveMonitor {
    /// Create a monitor whose clocks start now.
    #[must_use]
    pub fn new(options: KeepAliveOptions) -> Self { Self::starting_at(options, Instant::now()) }

    /// Create a monitor whose clocks start at `epoch`.
    #[must_use]
    pub fn starting_at(options: KeepAliveOptions, epoch: Instant) -> Self {
        Self {
            options,
            epoch,
            last_local: AtomicU64::new(0),
            last_peer: AtomicU64::new(0),
            failed: AtomicBool::new(false),
        }
    }

    /// Thresholds in effect.
    #[must_use]
    pub const fn options(&self) -> &KeepAliveOptions { &self.options }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> KeepAliveState {
        if self.failed.load(Ordering::Acquire) {
            KeepAliveState::Failed
        } else if self.options.is_enabled() {
            KeepAliveState::Armed
        } else {
            KeepAliveState::Idle
        }
    }

    fn stamp(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_nanos()).unwrap_or(u64::MAX)
    }

    fn silence(&self, clock: &AtomicU64, now: Instant) -> Duration {
        Duration::from_nanos(self.stamp(now).saturating_sub(clock.load(Ordering::Acquire)))
    }

    /// Record a message received from the peer.
    pub fn record_inbound(&self) { self.record_inbound_at(Instant::now()); }

    /// Record a message received from the peer at `now`.
    pub fn record_inbound_at(&self, now: Instant) {
        self.last_peer.fetch_max(self.stamp(now), Ordering::AcqRel);
    }

    /// Record a message sent to the peer.
    pub fn record_outbound(&self) { self.record_outbound_at(Instant::now()); }

    /// Record a message sent to the peer at `now`.
    pub fn record_outbound_at(&self, now: Instant) {
        self.last_local.fetch_max(self.stamp(now), Ordering::AcqRel);
    }

    /// Check both clocks at `now`.
    ///
    /// Peer silence is checked first. Returning
    /// [`KeepAliveAction::SendHeartbeat`] also resets the local clock, so the
    /// next heartbeat is due a full `timeout` later unless other traffic
    /// intervenes.
    pub fn poll(&self, now: Instant) -> KeepAliveAction {
        if !self.options.is_enabled() {
            return KeepAliveAction::Nothing;
        }
        let peer_silence = self.silence(&self.last_peer, now);
        if self.failed.load(Ordering::Acquire) || peer_silence > self.options.peer_timeout {
            if !self.failed.swap(true, Ordering::AcqRel) {
                metrics::inc_liveness_failures();
                warn!(silent_for = ?peer_silence, peer_timeout = ?self.options.peer_timeout, "peer timed out");
            }
            return KeepAliveAction::PeerTimedOut {
                silent_for: peer_silence,
            };
        }
        if self.silence(&self.last_local, now) > self.options.timeout {
            self.record_outbound_at(now);
            return KeepAliveAction::SendHeartbeat;
        }
        KeepAliveAction::Nothing
    }

    /// Interval between checks, or `None` while disabled.
    ///
    /// A quarter of the shorter threshold, but never below one millisecond.
    #[must_use]
    pub fn tick_period(&self) -> Option<Duration> {
        self.options.is_enabled().then(|| {
            (self.options.timeout.min(self.options.peer_timeout) / 4).max(MIN_TICK)
        })
    }

    /// Check the clocks periodically until shutdown or peer failure.
    ///
    /// Heartbeats go to `sink`. A closed sink ends the task as if `shutdown`
    /// had fired. While disabled the task just waits for `shutdown`.
    ///
    /// # Errors
    ///
    /// Returns [`LivenessError::PeerTimedOut`] once the peer has been silent
    /// past `peer_timeout`.
    pub async fn run<S>(&self, sink: &S, shutdown: &CancellationToken) -> Result<(), LivenessError>
    where
        S: HeartbeatSink + ?Sized,
    {
        let Some(period) = self.tick_period() else {
            shutdown.cancelled().await;
            return Ok(());
        };
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(()),
                now = ticker.tick() => match self.poll(now) {
                    KeepAliveAction::Nothing => {}
                    KeepAliveAction::SendHeartbeat => {
                        if sink.send_heartbeat().await.is_err() {
                            debug!("heartbeat sink closed; keep-alive stopping");
                            return Ok(());
                        }
                        metrics::inc_heartbeats();
                        debug!("heartbeat sent");
                    }
                    KeepAliveAction::PeerTimedOut { silent_for } => {
                        return Err(LivenessError::PeerTimedOut { silent_for });
                    }
                },
            }
        }
    }
}
