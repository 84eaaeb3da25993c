//! Chunked byte-stream transfers multiplexed over one connection.
//!
//! A payload of any size moves as a sequence of [`StreamChunk`] messages that
//! share a [`StreamId`]. Each chunk carries at most
//! `max_stream_content_length` bytes and an empty chunk closes the stream.
//!
//! The sending side is driven by [`ChunkSender`], which keeps exactly one
//! chunk in flight and aborts the whole transfer when the peer answers a
//! chunk with an error. The receiving side is a [`StreamScope`] held by the
//! connection's [`StreamRegistry`].
//!
//! The wire format carries no sequence number, so ordering is established
//! locally: the connection reader asks the registry for a [`ChunkTicket`]
//! while it still sees chunks in wire order, and [`StreamScope::apply`]
//! applies chunks strictly in ticket order even when dispatch workers run
//! them concurrently.
//!
//! [`StreamChunk`]: crate::message::StreamChunk
//! [`StreamId`]: crate::message::StreamId

mod compression;
pub mod config;
pub mod error;
pub mod registry;
pub mod scope;
pub mod sender;

use derive_more::Display;

use crate::message::StreamId;

pub use config::{CompressionConfig, DEFAULT_MAX_STREAM_CONTENT_LENGTH, StreamScopeOptions};
pub use error::StreamError;
pub use registry::StreamRegistry;
pub use scope::{ChunkOutcome, StreamScope};
pub use sender::{ChunkSender, ChunkTransport};

/// Lifecycle of a stream scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum ScopeState {
    /// Chunks are accepted.
    Open,
    /// The close chunk was processed; waiting for its acknowledgement.
    Closing,
    /// No further chunks are accepted.
    Closed,
}

/// Local arrival position of a chunk within its scope.
///
/// Tickets are issued by [`StreamScope::issue_ticket`] in the order chunks
/// are read from the wire and never leave the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("{stream_id}#{seq}")]
pub struct ChunkTicket {
    stream_id: StreamId,
    seq: u64,
}

impl ChunkTicket {
    /// Scope that issued the ticket.
    #[must_use]
    pub const fn stream_id(self) -> StreamId { self.stream_id }

    /// Position of the chunk within its scope, starting at zero.
    #[must_use]
    pub const fn seq(self) -> u64 { self.seq }
}
