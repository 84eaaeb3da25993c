//! Application hooks invoked for inbound work.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    dispatch::WorkError,
    message::{Call, ErrorCode, Event, StreamId},
};

pub(crate) fn unknown_method(method: &str) -> WorkError {
    WorkError::with_code(ErrorCode::UNKNOWN_METHOD, format!("unknown method `{method}`"))
}

/// Receives the calls, events and completed streams sent by the peer.
///
/// Every hook runs on a dispatch worker, never on the connection reader. The
/// defaults reject calls with [`ErrorCode::UNKNOWN_METHOD`] and accept
/// everything else, so `()` serves as a handler for purely outbound use.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// Serve a call. `Ok` becomes a `Response`, `Err` an `Error` carrying the
    /// [`WorkError`]'s code.
    ///
    /// `cancel` fires when the peer sends `Cancel` for this call or the
    /// connection aborts.
    async fn on_call(&self, call: Call, cancel: CancellationToken) -> Result<Bytes, WorkError> {
        let _ = cancel;
        Err(unknown_method(&call.method))
    }

    /// Handle a notification. Errors are logged and reported as
    /// [`ConnectionEvent::WorkFailed`](super::ConnectionEvent::WorkFailed).
    async fn on_event(&self, event: Event) -> Result<(), WorkError> {
        let _ = event;
        Ok(())
    }

    /// Consume a fully received stream. The returned bytes answer the close
    /// chunk.
    async fn on_stream(&self, stream_id: StreamId, payload: Bytes) -> Result<Bytes, WorkError> {
        let _ = (stream_id, payload);
        Ok(Bytes::new())
    }
}

#[async_trait]
impl RpcHandler for () {}

#[async_trait]
impl<H: RpcHandler + ?Sized> RpcHandler for Arc<H> {
    async fn on_call(&self, call: Call, cancel: CancellationToken) -> Result<Bytes, WorkError> {
        (**self).on_call(call, cancel).await
    }

    async fn on_event(&self, event: Event) -> Result<(), WorkError> { (**self).on_event(event).await }

    async fn on_stream(&self, stream_id: StreamId, payload: Bytes) -> Result<Bytes, WorkError> {
        (**self).on_stream(stream_id, payload).await
    }
}
