//! Errors raised by chunked stream transfers.

use thiserror::Error;

use super::ChunkTicket;
use crate::message::{ErrorCode, StreamId};

/// Failure of a stream scope, a chunk transfer or the stream registry.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// No scope is registered under the id.
    #[error("unknown stream {0}")]
    UnknownStream(StreamId),

    /// A scope with this id is still open.
    #[error("stream {0} is already open")]
    AlreadyOpen(StreamId),

    /// Every outbound stream id has been used.
    #[error("outbound stream ids exhausted")]
    IdsExhausted,

    /// The scope no longer accepts chunks.
    #[error("stream {0} is closed")]
    Closed(StreamId),

    /// A ticket was applied twice or after the scope moved past it.
    #[error("stale chunk ticket {0}")]
    StaleTicket(ChunkTicket),

    /// The receiver answered a chunk with an error; the transfer is aborted.
    #[error("chunk for stream {stream_id} rejected ({code}): {message}")]
    ChunkRejected {
        /// Scope the chunk belonged to.
        stream_id: StreamId,
        /// Code carried by the error response.
        code: ErrorCode,
        /// Message carried by the error response.
        message: String,
    },

    /// A received chunk is larger than the scope allows.
    #[error("chunk of {len} bytes exceeds stream limit of {max}")]
    ChunkTooLarge {
        /// Length of the chunk.
        len: usize,
        /// Configured maximum chunk length.
        max: usize,
    },

    /// Deflating the outbound payload failed.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Inflating the reassembled payload failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// The inflated payload grew past the configured limit.
    #[error("decompressed payload exceeds {max} bytes")]
    DecompressedTooLarge {
        /// Configured `max_decompressed_length`.
        max: usize,
    },

    /// The transfer was cancelled before the close chunk was acknowledged.
    #[error("transfer on stream {0} was cancelled")]
    Cancelled(StreamId),

    /// The chunk could not be delivered to the peer.
    #[error("transport failure: {0}")]
    Transport(String),
}
