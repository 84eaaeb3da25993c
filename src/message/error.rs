//! Error types for message encoding, decoding and framing.
//!
//! [`ProtocolError`] describes a single malformed message. Its frame has
//! already been consumed in full, so the reader can report the error and keep
//! going. [`CodecError`] covers failures of the byte stream itself, after
//! which frame boundaries can no longer be trusted.

use std::io;

use thiserror::Error;

use super::MessageKind;

/// Semantic violation found while encoding or decoding one message.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The discriminator is unknown, or not defined for the negotiated
    /// version.
    #[error("unknown message type {type_id} for protocol v{version}")]
    UnknownMessageType {
        /// Discriminator read from the wire.
        type_id: u8,
        /// Negotiated protocol version.
        version: u8,
    },

    /// The message was written with a version this reader does not accept.
    #[error("unsupported protocol version {version}; highest accepted is {max}")]
    UnsupportedVersion {
        /// Version read from the header.
        version: u8,
        /// Highest version accepted by the reader.
        max: u8,
    },

    /// A kind that requires a correlation id carried none.
    #[error("{kind} message is missing its correlation id")]
    MissingCorrelationId {
        /// Kind of the offending message.
        kind: MessageKind,
    },

    /// The body ended before a declared field was complete.
    #[error("truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Field being read.
        field: &'static str,
        /// Bytes required by the field.
        needed: usize,
        /// Bytes left in the frame.
        remaining: usize,
    },

    /// Bytes remained after the last field of the message.
    #[error("{count} trailing bytes after {kind} message")]
    TrailingBytes {
        /// Kind of the offending message.
        kind: MessageKind,
        /// Number of unread bytes.
        count: usize,
    },

    /// A stream id was below 1.
    #[error("invalid stream id {0}; stream ids start at 1")]
    InvalidStreamId(i64),

    /// A text field was not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field being read.
        field: &'static str,
    },

    /// A field is longer than its length prefix can describe.
    #[error("{field} is {len} bytes; the limit is {max}")]
    FieldTooLong {
        /// Field being written.
        field: &'static str,
        /// Actual length.
        len: usize,
        /// Largest encodable length.
        max: usize,
    },

    /// The message cannot be written at the requested version.
    #[error("{kind} messages require protocol {since} or later")]
    KindUnavailable {
        /// Kind being written.
        kind: MessageKind,
        /// First version defining the kind.
        since: u8,
    },
}

/// Wire-level problems with the length prefix.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The length prefix exceeds the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Length announced by the prefix.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A zero-length frame cannot hold a message header.
    #[error("empty frame not permitted")]
    EmptyFrame,
}

/// The peer closed the stream part-way through a frame.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// EOF while reading the length prefix.
    #[error("premature EOF during header: {bytes_received} of {header_size} header bytes")]
    MidHeader {
        /// Header bytes received before EOF.
        bytes_received: usize,
        /// Size of the length prefix.
        header_size: usize,
    },

    /// EOF while reading a frame body.
    #[error("premature EOF: {bytes_received} bytes of {expected} byte frame received")]
    MidFrame {
        /// Body bytes received before EOF.
        bytes_received: usize,
        /// Length announced by the prefix.
        expected: usize,
    },
}

/// Fatal failure of the framed byte stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Invalid length prefix.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// An outbound message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Premature end of stream.
    #[error("EOF: {0}")]
    Eof(#[from] EofError),
}
