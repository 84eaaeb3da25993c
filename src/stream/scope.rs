//! State and reconstruction buffer of one chunked transfer.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::{ChunkTicket, ScopeState, StreamError, StreamScopeOptions, compression};
use crate::message::StreamId;

/// Result of applying one chunk to a scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The chunk was appended to the reconstruction buffer.
    Accepted,
    /// The chunk arrived ahead of its turn and was buffered.
    Deferred,
    /// The close chunk was applied; carries the reassembled payload.
    Completed(Bytes),
}

#[derive(Debug)]
struct ScopeInner {
    state: ScopeState,
    buffer: BytesMut,
    issued: u64,
    sealed: bool,
    next: u64,
    pending: BTreeMap<u64, Bytes>,
}

impl ScopeInner {
    fn close(&mut self) {
        self.state = ScopeState::Closed;
        self.buffer = BytesMut::new();
        self.pending.clear();
    }
}

/// One logical chunked-transfer channel.
///
/// A scope is shared between the connection reader, which issues tickets in
/// wire order, and the dispatch workers that apply chunks. All state lives
/// behind a single mutex.
#[derive(Debug)]
pub struct StreamScope {
    stream_id: StreamId,
    options: StreamScopeOptions,
    inner: Mutex<ScopeInner>,
}

impl StreamScope {
    /// Create an open scope.
    #[must_use]
    pub fn new(stream_id: StreamId, options: StreamScopeOptions) -> Self {
        Self {
            stream_id,
            options,
            inner: Mutex::new(ScopeInner {
                state: ScopeState::Open,
                buffer: BytesMut::new(),
                issued: 0,
                sealed: false,
                next: 0,
                pending: BTreeMap::new(),
            }),
        }
    }

    /// Identifier of this scope.
    #[must_use]
    pub const fn stream_id(&self) -> StreamId { self.stream_id }

    /// Options the scope was opened with.
    #[must_use]
    pub const fn options(&self) -> &StreamScopeOptions { &self.options }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ScopeState { self.lock().state }

    fn lock(&self) -> MutexGuard<'_, ScopeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the next position for a chunk read from the wire.
    ///
    /// `is_close` marks the close chunk; no tickets are issued after it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] once the scope has left
    /// [`ScopeState::Open`] or its close chunk has been ticketed.
    pub fn issue_ticket(&self, is_close: bool) -> Result<ChunkTicket, StreamError> {
        let mut inner = self.lock();
        if inner.state != ScopeState::Open || inner.sealed {
            return Err(StreamError::Closed(self.stream_id));
        }
        let seq = inner.issued;
        inner.issued += 1;
        inner.sealed = is_close;
        Ok(ChunkTicket {
            stream_id: self.stream_id,
            seq,
        })
    }

    /// Apply a ticketed chunk.
    ///
    /// Chunks are appended strictly in ticket order. A chunk whose ticket is
    /// not yet due is held back and applied by whichever call fills the gap,
    /// so [`ChunkOutcome::Completed`] is returned by the call that applies
    /// the close chunk, not necessarily the call that carried it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] when the scope is no longer open,
    /// [`StreamError::StaleTicket`] for a ticket this scope did not issue or
    /// already applied, [`StreamError::ChunkTooLarge`] for an oversized
    /// chunk, and a decompression error when the reassembled payload cannot
    /// be inflated. Every error except the first two closes the scope.
    pub fn apply(&self, ticket: ChunkTicket, data: Bytes) -> Result<ChunkOutcome, StreamError> {
        let mut inner = self.lock();
        if inner.state != ScopeState::Open {
            return Err(StreamError::Closed(self.stream_id));
        }
        let seq = ticket.seq();
        if ticket.stream_id() != self.stream_id
            || seq < inner.next
            || seq >= inner.issued
            || inner.pending.contains_key(&seq)
        {
            return Err(StreamError::StaleTicket(ticket));
        }
        let max = self.options.max_stream_content_length.get();
        if data.len() > max {
            inner.close();
            warn!(stream_id = %self.stream_id, len = data.len(), max, "oversized chunk closed stream");
            return Err(StreamError::ChunkTooLarge {
                len: data.len(),
                max,
            });
        }
        if seq > inner.next {
            inner.pending.insert(seq, data);
            debug!(stream_id = %self.stream_id, %ticket, "chunk deferred");
            return Ok(ChunkOutcome::Deferred);
        }

        let result = self.absorb_ready(&mut inner, data);
        if result.is_err() {
            inner.close();
        }
        result
    }

    fn absorb_ready(
        &self,
        inner: &mut ScopeInner,
        data: Bytes,
    ) -> Result<ChunkOutcome, StreamError> {
        let mut outcome = self.absorb(inner, data)?;
        while let Some(data) = inner.pending.remove(&inner.next) {
            outcome = self.absorb(inner, data)?;
        }
        Ok(outcome)
    }

    fn absorb(&self, inner: &mut ScopeInner, data: Bytes) -> Result<ChunkOutcome, StreamError> {
        inner.next += 1;
        if !data.is_empty() {
            inner.buffer.extend_from_slice(&data);
            return Ok(ChunkOutcome::Accepted);
        }

        let assembled = std::mem::take(&mut inner.buffer).freeze();
        let payload = match self.options.default_compression {
            Some(config) if !assembled.is_empty() => compression::decompress(
                &assembled,
                self.options.decompression_buffer_size(),
                config.max_decompressed_length,
            )?,
            _ => assembled,
        };
        inner.state = ScopeState::Closing;
        debug!(stream_id = %self.stream_id, len = payload.len(), "stream completed");
        Ok(ChunkOutcome::Completed(payload))
    }

    /// Mark the scope as closing on the sending side.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] if the scope is not open.
    pub fn begin_close(&self) -> Result<(), StreamError> {
        let mut inner = self.lock();
        if inner.state != ScopeState::Open {
            return Err(StreamError::Closed(self.stream_id));
        }
        inner.state = ScopeState::Closing;
        inner.sealed = true;
        Ok(())
    }

    /// Complete the close handshake.
    ///
    /// Returns `true` if the scope moved from [`ScopeState::Closing`] to
    /// [`ScopeState::Closed`].
    pub fn acknowledge_close(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == ScopeState::Closing {
            inner.close();
            true
        } else {
            false
        }
    }

    /// Close the scope immediately, discarding buffered data.
    ///
    /// Returns the state the scope was in.
    pub fn force_close(&self) -> ScopeState {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.close();
        previous
    }
}
