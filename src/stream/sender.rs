//! Outbound side of a chunked transfer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ScopeState, StreamError, StreamScope, compression};
use crate::{message::StreamId, metrics};

/// Delivers one chunk to the peer and waits for its response.
///
/// Implementations attach a fresh correlation id to each chunk and resolve
/// with the data of the matching `StreamChunkResponse`. An `Error` reply is
/// reported as [`StreamError::ChunkRejected`].
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Send `data` on `stream_id`.
    async fn send_chunk(&self, stream_id: StreamId, data: Bytes) -> Result<Bytes, StreamError>;
}

#[async_trait]
impl<T: ChunkTransport + ?Sized> ChunkTransport for Arc<T> {
    async fn send_chunk(&self, stream_id: StreamId, data: Bytes) -> Result<Bytes, StreamError> {
        (**self).send_chunk(stream_id, data).await
    }
}

#[async_trait]
impl<'a, T: ChunkTransport + ?Sized> ChunkTransport for &'a T {
    async fn send_chunk(&self, stream_id: StreamId, data: Bytes) -> Result<Bytes, StreamError> {
        (**self).send_chunk(stream_id, data).await
    }
}

/// Splits a payload into chunks and sends them one at a time.
///
/// The next chunk is only sent once the previous one has been acknowledged.
/// Any failure closes the scope and abandons the transfer; nothing is
/// retried.
pub struct ChunkSender<T> {
    transport: T,
    scope: Arc<StreamScope>,
    cancel: CancellationToken,
}

impl<T: ChunkTransport> ChunkSender<T> {
    /// Create a sender for `scope`.
    #[must_use]
    pub fn new(transport: T, scope: Arc<StreamScope>) -> Self {
        Self {
            transport,
            scope,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the transfer when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Scope driven by this sender.
    #[must_use]
    pub fn scope(&self) -> &Arc<StreamScope> { &self.scope }

    /// Transfer `payload` and close the stream.
    ///
    /// Returns the data the peer attached to its acknowledgement of the close
    /// chunk.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ChunkRejected`] when the peer answers a chunk
    /// with an error, [`StreamError::Cancelled`] when the transfer is
    /// cancelled or the scope is closed underneath it, and any compression or
    /// transport error. The scope is closed in every error case.
    pub async fn send(&self, payload: Bytes) -> Result<Bytes, StreamError> {
        let result = self.send_inner(payload).await;
        if let Err(err) = &result {
            self.scope.force_close();
            warn!(stream_id = %self.scope.stream_id(), error = %err, "stream transfer aborted");
        }
        result
    }

    async fn send_inner(&self, payload: Bytes) -> Result<Bytes, StreamError> {
        let options = self.scope.options();
        let body = match options.default_compression {
            Some(config) => {
                compression::compress(&payload, config.level, options.compression_buffer_size())?
            }
            None => payload,
        };

        let max = options.max_stream_content_length.get();
        let mut offset = 0;
        while offset < body.len() {
            let end = body.len().min(offset + max);
            self.exchange(body.slice(offset..end)).await?;
            offset = end;
        }

        self.ensure_open()?;
        self.scope.begin_close()?;
        let reply = self.exchange(Bytes::new()).await?;
        self.scope.acknowledge_close();
        debug!(stream_id = %self.scope.stream_id(), len = body.len(), "stream transfer complete");
        Ok(reply)
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() || self.scope.state() == ScopeState::Closed {
            return Err(StreamError::Cancelled(self.scope.stream_id()));
        }
        Ok(())
    }

    async fn exchange(&self, data: Bytes) -> Result<Bytes, StreamError> {
        if !data.is_empty() {
            self.ensure_open()?;
        }
        let stream_id = self.scope.stream_id();
        let len = data.len();
        let reply = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StreamError::Cancelled(stream_id)),
            reply = self.transport.send_chunk(stream_id, data) => reply,
        }?;
        metrics::inc_chunks(metrics::Direction::Outbound);
        debug!(%stream_id, len, "chunk acknowledged");
        Ok(reply)
    }
}
