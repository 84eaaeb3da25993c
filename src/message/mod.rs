//! Typed, versioned messages exchanged between two peers.
//!
//! Every message on the wire starts with a common header:
//!
//! ```text
//! +------+----------------------------+---------+------------------+
//! | kind | correlation id (u64, BE)   | version | kind-specific    |
//! | (u8) | present iff kind needs one | (u8)    | fields           |
//! +------+----------------------------+---------+------------------+
//! ```
//!
//! [`MessageKind`] is a closed enumeration. The decode table in
//! [`wire`] is keyed by kind and protocol version, and anything outside it is
//! rejected with a [`ProtocolError`] rather than skipped. [`MessageCodec`]
//! adds a `u32` length prefix so messages can be carried over a plain byte
//! stream.

pub mod codec;
pub mod error;
pub mod payload;
mod types;
pub mod wire;

#[cfg(test)]
mod tests;

use std::num::NonZeroU64;

use derive_more::Display;
use serde::{Deserialize, Serialize};

pub use codec::{DEFAULT_MAX_FRAME_LENGTH, MessageCodec};
pub use error::{CodecError, EofError, FramingError, ProtocolError};
pub use payload::Payload;
pub use types::{
    Call,
    Cancel,
    Envelope,
    ErrorMessage,
    Event,
    Message,
    Response,
    StreamChunk,
    StreamChunkResponse,
};

/// Protocol revision a message body was written with.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[display("v{_0}")]
pub struct ProtocolVersion(u8);

impl ProtocolVersion {
    /// Initial protocol: errors carry only a message and calls cannot be
    /// cancelled remotely.
    pub const V1: Self = Self(1);
    /// Adds error codes and the [`MessageKind::Cancel`] message.
    pub const V2: Self = Self(2);
    /// Version written by this implementation.
    pub const CURRENT: Self = Self::V2;

    /// Wrap a raw version number, rejecting versions this crate cannot read.
    #[must_use]
    pub const fn new(raw: u8) -> Option<Self> {
        if raw == 0 || raw > Self::CURRENT.0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Return the raw version number.
    #[must_use]
    pub const fn get(self) -> u8 { self.0 }
}

impl Default for ProtocolVersion {
    fn default() -> Self { Self::CURRENT }
}

/// Discriminator written as the first byte of every message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[repr(u8)]
pub enum MessageKind {
    Call = 1,
    Response = 2,
    Error = 3,
    Event = 4,
    StreamChunk = 5,
    StreamChunkResponse = 6,
    Heartbeat = 7,
    HeartbeatResponse = 8,
    Cancel = 9,
}

impl MessageKind {
    /// Resolve a wire discriminator against the negotiated protocol version.
    ///
    /// Returns `None` for unknown discriminators and for kinds introduced
    /// after `version`.
    #[must_use]
    pub fn resolve(type_id: u8, version: ProtocolVersion) -> Option<Self> {
        let kind = match type_id {
            1 => Self::Call,
            2 => Self::Response,
            3 => Self::Error,
            4 => Self::Event,
            5 => Self::StreamChunk,
            6 => Self::StreamChunkResponse,
            7 => Self::Heartbeat,
            8 => Self::HeartbeatResponse,
            9 => Self::Cancel,
            _ => return None,
        };
        (kind.since() <= version).then_some(kind)
    }

    /// Wire discriminator for this kind.
    #[must_use]
    pub const fn type_id(self) -> u8 { self as u8 }

    /// Lower-case label used in logs and metrics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Response => "response",
            Self::Error => "error",
            Self::Event => "event",
            Self::StreamChunk => "stream_chunk",
            Self::StreamChunkResponse => "stream_chunk_response",
            Self::Heartbeat => "heartbeat",
            Self::HeartbeatResponse => "heartbeat_response",
            Self::Cancel => "cancel",
        }
    }

    /// Whether messages of this kind must carry a correlation id.
    #[must_use]
    pub const fn requires_id(self) -> bool {
        matches!(
            self,
            Self::Call
                | Self::Response
                | Self::Error
                | Self::StreamChunk
                | Self::StreamChunkResponse
                | Self::Cancel
        )
    }

    /// First protocol version defining this kind.
    #[must_use]
    pub const fn since(self) -> ProtocolVersion {
        match self {
            Self::Cancel => ProtocolVersion::V2,
            _ => ProtocolVersion::V1,
        }
    }
}

/// Identifier linking a request to its eventual response.
///
/// Zero is reserved as "no id" on the wire, so a `CorrelationId` is never
/// zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{_0}")]
pub struct CorrelationId(NonZeroU64);

impl CorrelationId {
    /// Create an identifier, returning `None` for zero.
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 { self.0.get() }
}

/// Identifier of a chunked-transfer channel.
///
/// Stream ids are written as signed 64-bit integers and must be at least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{_0}")]
pub struct StreamId(NonZeroU64);

impl StreamId {
    /// Largest id representable on the wire.
    pub const MAX: u64 = i64::MAX.unsigned_abs();

    /// Create a stream id, returning `None` for zero or values above
    /// [`StreamId::MAX`].
    #[must_use]
    pub const fn new(raw: u64) -> Option<Self> {
        if raw > Self::MAX {
            return None;
        }
        match NonZeroU64::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 { self.0.get() }
}

/// Numeric error classification carried by [`ErrorMessage`] since
/// [`ProtocolVersion::V2`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display("{_0}")]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    /// Unclassified application failure. Version 1 errors decode as this.
    pub const GENERIC: Self = Self(0);
    /// The receiving side had no capacity to accept the work.
    pub const BUSY: Self = Self(1);
    /// No handler exists for the requested method.
    pub const UNKNOWN_METHOD: Self = Self(2);
    /// The call was cancelled before it completed.
    pub const CANCELLED: Self = Self(3);
    /// A chunk could not be applied to its stream.
    pub const STREAM: Self = Self(4);
}
