//! Connection-scoped table of live stream scopes.
//!
//! Inbound scopes are keyed by the id the peer chose; outbound scopes get ids
//! from a local counter. The two directions live in separate maps so both
//! peers can number their streams from 1 independently.
//!
//! Ids whose inbound scope finished or failed are retired. A chunk for a
//! retired id is refused until the application reopens it with
//! [`StreamRegistry::open_stream`]. Any other unknown id opens a scope, in
//! whatever order the peer's first chunks arrive.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use dashmap::{DashMap, DashSet, mapref::entry::Entry};
use tracing::{debug, info};

use super::{ChunkOutcome, ChunkTicket, ScopeState, StreamError, StreamScope, StreamScopeOptions};
use crate::{message::StreamId, metrics};

/// Owner of every [`StreamScope`] on one connection.
#[derive(Debug)]
pub struct StreamRegistry {
    options: StreamScopeOptions,
    inbound: DashMap<StreamId, Arc<StreamScope>>,
    outbound: DashMap<StreamId, Arc<StreamScope>>,
    retired: DashSet<StreamId>,
    next_outbound: AtomicU64,
}

impl StreamRegistry {
    /// Create an empty registry. `options` apply to scopes the peer opens
    /// implicitly and to outbound scopes opened without explicit options.
    #[must_use]
    pub fn new(options: StreamScopeOptions) -> Self {
        Self {
            options,
            inbound: DashMap::new(),
            outbound: DashMap::new(),
            retired: DashSet::new(),
            next_outbound: AtomicU64::new(1),
        }
    }

    /// Default options for new scopes.
    #[must_use]
    pub const fn options(&self) -> &StreamScopeOptions { &self.options }

    /// Number of live scopes in both directions.
    #[must_use]
    pub fn len(&self) -> usize { self.inbound.len() + self.outbound.len() }

    /// Whether no scope is live.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Look up a live inbound scope.
    #[must_use]
    pub fn inbound(&self, stream_id: StreamId) -> Option<Arc<StreamScope>> {
        self.inbound.get(&stream_id).map(|scope| Arc::clone(&scope))
    }

    /// Open an inbound scope with explicit options.
    ///
    /// A closed scope with the same id is replaced, which is how a stream is
    /// reopened.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadyOpen`] if a scope with this id is still
    /// open or closing.
    pub fn open_stream(
        &self,
        stream_id: StreamId,
        options: StreamScopeOptions,
    ) -> Result<Arc<StreamScope>, StreamError> {
        let scope = Arc::new(StreamScope::new(stream_id, options));
        match self.inbound.entry(stream_id) {
            Entry::Occupied(entry) if entry.get().state() != ScopeState::Closed => {
                return Err(StreamError::AlreadyOpen(stream_id));
            }
            Entry::Occupied(mut entry) => {
                entry.insert(Arc::clone(&scope));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&scope));
                metrics::inc_open_streams();
            }
        }
        self.retired.remove(&stream_id);
        debug!(%stream_id, "inbound stream opened");
        Ok(scope)
    }

    /// Open an outbound scope under a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::IdsExhausted`] once every id has been used.
    pub fn open_outbound(
        &self,
        options: Option<StreamScopeOptions>,
    ) -> Result<Arc<StreamScope>, StreamError> {
        let raw = self.next_outbound.fetch_add(1, Ordering::Relaxed);
        let stream_id = StreamId::new(raw).ok_or(StreamError::IdsExhausted)?;
        let scope = Arc::new(StreamScope::new(stream_id, options.unwrap_or(self.options)));
        self.outbound.insert(stream_id, Arc::clone(&scope));
        metrics::inc_open_streams();
        debug!(%stream_id, "outbound stream opened");
        Ok(scope)
    }

    /// Reserve the next position for a chunk on `stream_id`.
    ///
    /// The first chunk for an unknown id opens a scope with the registry's
    /// default options.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] for a retired id, or when the close
    /// chunk was already ticketed.
    pub fn ticket(&self, stream_id: StreamId, is_close: bool) -> Result<ChunkTicket, StreamError> {
        let scope = match self.inbound(stream_id) {
            Some(scope) => scope,
            None => self.open_implicit(stream_id)?,
        };
        scope.issue_ticket(is_close)
    }

    fn open_implicit(&self, stream_id: StreamId) -> Result<Arc<StreamScope>, StreamError> {
        if self.retired.contains(&stream_id) {
            return Err(StreamError::Closed(stream_id));
        }
        let scope = Arc::clone(
            self.inbound
                .entry(stream_id)
                .or_insert_with(|| {
                    metrics::inc_open_streams();
                    Arc::new(StreamScope::new(stream_id, self.options))
                })
                .value(),
        );
        debug!(%stream_id, "inbound stream opened by peer");
        Ok(scope)
    }

    /// Apply a ticketed chunk to its scope.
    ///
    /// A scope that fails to apply a chunk is closed and removed.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownStream`] if the scope is gone, or the
    /// error raised by [`StreamScope::apply`].
    pub fn apply(&self, ticket: ChunkTicket, data: Bytes) -> Result<ChunkOutcome, StreamError> {
        let stream_id = ticket.stream_id();
        let scope = self
            .inbound(stream_id)
            .ok_or(StreamError::UnknownStream(stream_id))?;
        let result = scope.apply(ticket, data);
        if result.is_err() && scope.state() == ScopeState::Closed {
            self.remove_inbound(stream_id, &scope);
        }
        result
    }

    /// Ticket and apply a chunk in one step.
    ///
    /// Suitable when the caller already serializes chunks of a stream.
    ///
    /// # Errors
    ///
    /// See [`StreamRegistry::ticket`] and [`StreamRegistry::apply`].
    pub fn feed_chunk(&self, stream_id: StreamId, data: Bytes) -> Result<ChunkOutcome, StreamError> {
        let ticket = self.ticket(stream_id, data.is_empty())?;
        self.apply(ticket, data)
    }

    /// Finish the close handshake of a completed inbound stream and drop it.
    ///
    /// Returns `false` if the stream was not waiting for acknowledgement.
    pub fn acknowledge_close(&self, stream_id: StreamId) -> bool {
        let Some(scope) = self.inbound(stream_id) else {
            return false;
        };
        let closed = scope.acknowledge_close();
        if closed {
            self.remove_inbound(stream_id, &scope);
        }
        closed
    }

    /// Drop an outbound scope once its sender has finished with it.
    pub fn release_outbound(&self, stream_id: StreamId) {
        if self.outbound.remove(&stream_id).is_some() {
            metrics::dec_open_streams();
        }
    }

    /// Force-close a stream in either direction.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownStream`] if no such stream is live.
    pub fn close_stream(&self, stream_id: StreamId) -> Result<(), StreamError> {
        let inbound = self.inbound(stream_id);
        let removed = match inbound {
            Some(scope) => {
                self.retired.insert(stream_id);
                self.inbound.remove_if(&stream_id, |_, current| Arc::ptr_eq(current, &scope))
            }
            None => self.outbound.remove(&stream_id),
        };
        let (_, scope) = removed.ok_or(StreamError::UnknownStream(stream_id))?;
        scope.force_close();
        metrics::dec_open_streams();
        debug!(%stream_id, "stream closed");
        Ok(())
    }

    /// Force-close every stream, returning how many were live.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for map in [&self.inbound, &self.outbound] {
            map.retain(|_, scope| {
                scope.force_close();
                closed += 1;
                false
            });
        }
        for _ in 0..closed {
            metrics::dec_open_streams();
        }
        if closed > 0 {
            info!(closed, "force-closed open streams");
        }
        closed
    }

    fn remove_inbound(&self, stream_id: StreamId, scope: &Arc<StreamScope>) {
        // Retire before removing so the reader never sees the id as unknown.
        self.retired.insert(stream_id);
        if self
            .inbound
            .remove_if(&stream_id, |_, current| Arc::ptr_eq(current, scope))
            .is_some()
        {
            metrics::dec_open_streams();
        }
    }
}
