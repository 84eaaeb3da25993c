//! Canonical error and result types for the crate.
//!
//! Each module reports its own error enum. [`RpcwireError`] folds them into
//! one type for applications that just want to propagate with `?`.

use thiserror::Error;

use crate::{
    connection::{CallError, ConnectionError, RouteError},
    dispatch::{DispatchError, WorkError},
    keepalive::LivenessError,
    message::{CodecError, ProtocolError},
    stream::StreamError,
};

/// Top-level error type exposed by `rpcwire`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RpcwireError {
    /// A message violated the wire format.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The byte stream broke or lost frame sync.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Work could not be queued.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// A work item failed.
    #[error(transparent)]
    Work(#[from] WorkError),
    /// A chunked transfer failed.
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// The peer stopped responding.
    #[error(transparent)]
    Liveness(#[from] LivenessError),
    /// A connection could not start.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// An outbound call failed.
    #[error(transparent)]
    Call(#[from] CallError),
    /// A handler name was registered twice.
    #[error(transparent)]
    Route(#[from] RouteError),
}

impl RpcwireError {
    /// Whether this error means the connection is gone rather than that one
    /// request failed.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Codec(_) | Self::Liveness(_) | Self::Call(CallError::ConnectionClosed)
        )
    }
}

/// Canonical result alias used by `rpcwire` public APIs.
pub type Result<T, E = RpcwireError> = std::result::Result<T, E>;
