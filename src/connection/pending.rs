//! Correlation of outbound requests with their replies.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::oneshot;

use super::CallError;
use crate::message::CorrelationId;

pub(crate) type Reply = Result<Bytes, CallError>;

/// Requests awaiting a `Response`, `Error` or `StreamChunkResponse`.
///
/// Calls and stream chunks share one id space so a reply can be routed
/// without knowing what it answers.
#[derive(Debug)]
pub(crate) struct PendingCalls {
    next_id: AtomicU64,
    waiting: DashMap<CorrelationId, oneshot::Sender<Reply>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiting: DashMap::new(),
        }
    }

    /// Allocate an id and the receiver its reply will arrive on.
    ///
    /// Ids wrap after `u64::MAX`, skipping zero and any id still waiting.
    pub(crate) fn register(&self) -> (CorrelationId, oneshot::Receiver<Reply>) {
        loop {
            let Some(id) = CorrelationId::new(self.next_id.fetch_add(1, Ordering::Relaxed)) else {
                continue;
            };
            if let Entry::Vacant(slot) = self.waiting.entry(id) {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                return (id, rx);
            }
        }
    }

    /// Deliver `reply` to the request waiting on `id`.
    ///
    /// Returns `false` when nothing is waiting, for example after a local
    /// cancel.
    pub(crate) fn resolve(&self, id: CorrelationId, reply: Reply) -> bool {
        match self.waiting.remove(&id) {
            Some((_, tx)) => {
                // The caller may have stopped waiting.
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without replying.
    pub(crate) fn discard(&self, id: CorrelationId) { self.waiting.remove(&id); }

    pub(crate) fn len(&self) -> usize { self.waiting.len() }

    /// Fail every waiting request with [`CallError::ConnectionClosed`].
    pub(crate) fn fail_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.waiting.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.resolve(*id, Err(CallError::ConnectionClosed)))
            .count()
    }
}
