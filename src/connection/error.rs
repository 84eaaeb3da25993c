//! Errors raised by the connection surface.

use thiserror::Error;

use crate::{
    dispatch::DispatchError,
    message::{CodecError, ErrorCode},
    stream::StreamError,
};

/// A connection could not be started.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A configuration value is out of range.
    #[error("invalid connection options: {0}")]
    InvalidOptions(&'static str),
    /// The dispatch queue could not be built.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Failure of an outbound call or notification.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The peer answered with an `Error` message.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Code sent by the peer.
        code: ErrorCode,
        /// Description sent by the peer.
        message: String,
    },
    /// The call was cancelled locally.
    #[error("call cancelled")]
    Cancelled,
    /// The connection closed before a reply arrived.
    #[error("connection closed")]
    ConnectionClosed,
    /// The writer rejected the message.
    #[error("message could not be written: {0}")]
    Encode(String),
    /// A typed argument or result could not be converted.
    #[error("payload conversion failed: {0}")]
    Payload(String),
}

impl CallError {
    pub(crate) fn from_codec(error: &CodecError) -> Self { Self::Encode(error.to_string()) }

    /// Whether the peer refused the call for lack of capacity.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Remote { code, .. } if *code == ErrorCode::BUSY)
    }

    pub(crate) fn into_stream_error(self, stream_id: crate::message::StreamId) -> StreamError {
        match self {
            Self::Remote { code, message } => StreamError::ChunkRejected {
                stream_id,
                code,
                message,
            },
            Self::Cancelled => StreamError::Cancelled(stream_id),
            other => StreamError::Transport(other.to_string()),
        }
    }
}
