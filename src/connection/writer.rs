//! Task owning the outbound half of the byte stream.

use std::sync::Arc;

use futures::SinkExt;
use tokio::{io::AsyncWrite, sync::mpsc};
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use super::{CallError, CloseReason, ConnectionCore, router::error_reply};
use crate::{
    message::{CodecError, ErrorCode, Message, MessageCodec, MessageKind},
    metrics::{self, Direction},
};

pub(super) async fn write_loop<W>(
    core: Arc<ConnectionCore>,
    mut rx: mpsc::Receiver<Message>,
    mut sink: FramedWrite<W, MessageCodec>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            () = core.shutdown.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if let Err(error) = write_one(&core, &mut sink, message).await {
            warn!(error = %error, "connection write failed");
            core.close(CloseReason::Transport(error.to_string()));
            return;
        }
    }

    // Whatever was queued before shutdown still goes out.
    rx.close();
    while let Ok(message) = rx.try_recv() {
        if write_one(&core, &mut sink, message).await.is_err() {
            return;
        }
    }
    if let Err(error) = SinkExt::<Message>::close(&mut sink).await {
        debug!(error = %error, "closing connection writer failed");
    }
}

/// Write one message. Only transport failures are returned; a message the
/// codec refuses is dropped and its requester told.
async fn write_one<W>(
    core: &ConnectionCore,
    sink: &mut FramedWrite<W, MessageCodec>,
    message: Message,
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let kind = message.kind();
    let id = message.correlation_id();
    let error = match sink.send(message).await {
        Ok(()) => {
            core.keepalive.record_outbound();
            metrics::inc_messages(Direction::Outbound, kind.name());
            return Ok(());
        }
        Err(error @ (CodecError::Io(_) | CodecError::Eof(_))) => return Err(error),
        Err(error) => error,
    };
    warn!(kind = kind.name(), correlation_id = ?id, error = %error, "message not sent");
    let Some(id) = id else {
        return Ok(());
    };
    match kind {
        MessageKind::Call | MessageKind::StreamChunk => {
            core.pending.resolve(id, Err(CallError::from_codec(&error)));
            Ok(())
        }
        MessageKind::Response | MessageKind::StreamChunkResponse => {
            // The peer is still waiting on this id.
            let fallback = error_reply(id, ErrorCode::GENERIC, format!("reply not sent: {error}"));
            match sink.send(fallback).await {
                Err(error @ (CodecError::Io(_) | CodecError::Eof(_))) => Err(error),
                _ => Ok(()),
            }
        }
        _ => Ok(()),
    }
}
