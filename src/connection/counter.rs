//! Live connection count.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics;

static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Held by a running connection; counts it as active until dropped.
#[derive(Debug)]
pub(super) struct ActiveConnection;

impl ActiveConnection {
    pub(super) fn new() -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        metrics::inc_connections();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        metrics::dec_connections();
    }
}

/// Number of connections whose tasks are still running in this process.
#[must_use]
pub fn active_connection_count() -> u64 { ACTIVE_CONNECTIONS.load(Ordering::Relaxed) }
