//! Sequential reader routing decoded messages.
//!
//! The reader never runs application code. Heartbeats are answered inline,
//! replies settle pending requests, and calls, events and stream chunks are
//! handed to the dispatch queue at their priority band. Chunks are ticketed
//! here, in arrival order, so workers may apply them in any order.

use std::{panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, error, info, warn};

use super::{CallError, CloseReason, ConnectionCore, ConnectionEvent};
use crate::{
    dispatch::{ShutdownMode, WorkError},
    message::{
        Call,
        Cancel,
        CorrelationId,
        ErrorCode,
        ErrorMessage,
        Event,
        Message,
        MessageCodec,
        MessageKind,
        Response,
        StreamChunk,
        StreamChunkResponse,
    },
    metrics::{self, Direction},
    panic::format_panic,
    stream::{ChunkOutcome, ChunkTicket},
};

pub(super) fn error_reply(id: CorrelationId, code: ErrorCode, message: impl Into<String>) -> Message {
    Message::Error(ErrorMessage {
        id,
        code,
        message: message.into(),
    })
}

pub(super) async fn read_loop<R>(core: Arc<ConnectionCore>, mut frames: FramedRead<R, MessageCodec>)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let item = tokio::select! {
            biased;
            () = core.shutdown.cancelled() => break None,
            item = frames.next() => item,
        };
        match item {
            None => break Some(CloseReason::PeerClosed),
            Some(Err(error)) => {
                warn!(error = %error, "connection read failed");
                break Some(CloseReason::Transport(error.to_string()));
            }
            Some(Ok(Err(error))) => {
                core.keepalive.record_inbound();
                metrics::inc_protocol_errors();
                warn!(error = %error, "discarding malformed message");
                core.emit(ConnectionEvent::ProtocolError(error));
            }
            Some(Ok(Ok(envelope))) => {
                core.keepalive.record_inbound();
                metrics::inc_messages(Direction::Inbound, envelope.message.kind().name());
                route(&core, envelope.message).await;
            }
        }
    };
    if let Some(reason) = reason {
        core.close(reason);
    }
    teardown(&core).await;
}

/// Release everything the connection holds once it has stopped.
async fn teardown(core: &ConnectionCore) {
    let reason = core.close_reason();
    for entry in &core.running {
        entry.value().cancel();
    }
    let streams = core.streams.close_all();
    let calls = core.pending.fail_all();
    core.queue.shutdown(ShutdownMode::Abort).await;
    info!(%reason, streams, calls, "connection closed");
    core.emit(ConnectionEvent::Closed(reason));
}

async fn route(core: &Arc<ConnectionCore>, message: Message) {
    match message {
        Message::Heartbeat => {
            let _ = core.send(Message::HeartbeatResponse).await;
        }
        Message::HeartbeatResponse => {}
        Message::Response(Response { id, payload })
        | Message::StreamChunkResponse(StreamChunkResponse { id, data: payload }) => {
            settle(core, id, Ok(payload));
        }
        Message::Error(ErrorMessage { id, code, message }) => {
            settle(core, id, Err(CallError::Remote { code, message }));
        }
        Message::Cancel(Cancel { id }) => match core.running.get(&id) {
            Some(token) => {
                debug!(correlation_id = %id, "peer cancelled call");
                token.cancel();
            }
            None => debug!(correlation_id = %id, "cancel for unknown call"),
        },
        Message::Call(call) => dispatch_call(core, call).await,
        Message::Event(event) => dispatch_event(core, event),
        Message::StreamChunk(chunk) => dispatch_chunk(core, chunk).await,
    }
}

fn settle(core: &ConnectionCore, id: CorrelationId, reply: Result<Bytes, CallError>) {
    if !core.pending.resolve(id, reply) {
        debug!(correlation_id = %id, "reply for unknown or abandoned request");
    }
}

async fn dispatch_call(core: &Arc<ConnectionCore>, call: Call) {
    let id = call.id;
    let cancel = CancellationToken::new();
    if core.running.insert(id, cancel.clone()).is_some() {
        warn!(correlation_id = %id, "call id reused while still running");
    }
    let job_core = Arc::clone(core);
    let submitted = core.queue.try_submit(
        move |queued| serve_call(job_core, call, cancel, queued),
        core.options.priorities.rpc,
    );
    if let Err(error) = submitted {
        core.running.remove(&id);
        debug!(correlation_id = %id, error = %error, "call refused");
        core.emit(ConnectionEvent::WorkRejected {
            kind: MessageKind::Call,
        });
        let _ = core.send(error_reply(id, ErrorCode::BUSY, error.to_string())).await;
    }
}

async fn serve_call(
    core: Arc<ConnectionCore>,
    call: Call,
    cancel: CancellationToken,
    queued: CancellationToken,
) -> Result<(), WorkError> {
    let id = call.id;
    let result = if cancel.is_cancelled() {
        Ok(Err(WorkError::with_code(ErrorCode::CANCELLED, "call cancelled")))
    } else {
        let work = AssertUnwindSafe(core.handler.on_call(call, cancel.clone())).catch_unwind();
        tokio::pin!(work);
        tokio::select! {
            biased;
            result = &mut work => result,
            () = queued.cancelled() => {
                cancel.cancel();
                work.await
            }
        }
    };
    core.running.remove(&id);

    let outcome = match result {
        _ if cancel.is_cancelled() => Err(WorkError::with_code(ErrorCode::CANCELLED, "call cancelled")),
        Ok(outcome) => outcome,
        Err(panic) => Err(handler_panicked(&core, MessageKind::Call, &format_panic(panic).to_string())),
    };
    let reply = match &outcome {
        Ok(payload) => Message::Response(Response {
            id,
            payload: payload.clone(),
        }),
        Err(error) => error_reply(id, error.code(), error.message()),
    };
    if core.send(reply).await.is_err() {
        debug!(correlation_id = %id, "connection closed before reply");
    }
    outcome.map(|_| ())
}

fn handler_panicked(core: &ConnectionCore, kind: MessageKind, message: &str) -> WorkError {
    error!(kind = kind.name(), panic = %message, "handler panicked");
    core.emit(ConnectionEvent::WorkFailed {
        kind,
        error: format!("handler panicked: {message}"),
    });
    WorkError::new(format!("handler panicked: {message}"))
}

fn dispatch_event(core: &Arc<ConnectionCore>, event: Event) {
    let name = event.name.clone();
    let job_core = Arc::clone(core);
    let submitted = core
        .queue
        .try_submit(move |_| serve_event(job_core, event), core.options.priorities.event);
    if let Err(error) = submitted {
        warn!(event = %name, error = %error, "dropping event");
        core.emit(ConnectionEvent::WorkRejected {
            kind: MessageKind::Event,
        });
    }
}

async fn serve_event(core: Arc<ConnectionCore>, event: Event) -> Result<(), WorkError> {
    match AssertUnwindSafe(core.handler.on_event(event)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => {
            core.emit(ConnectionEvent::WorkFailed {
                kind: MessageKind::Event,
                error: error.to_string(),
            });
            Err(error)
        }
        Err(panic) => Err(handler_panicked(&core, MessageKind::Event, &format_panic(panic).to_string())),
    }
}

async fn dispatch_chunk(core: &Arc<ConnectionCore>, chunk: StreamChunk) {
    let StreamChunk { id, stream_id, data } = chunk;
    metrics::inc_chunks(Direction::Inbound);
    let ticket = match core.streams.ticket(stream_id, data.is_empty()) {
        Ok(ticket) => ticket,
        Err(error) => {
            debug!(%stream_id, correlation_id = %id, error = %error, "chunk refused");
            let _ = core.send(error_reply(id, ErrorCode::STREAM, error.to_string())).await;
            return;
        }
    };
    let job_core = Arc::clone(core);
    let submitted = core.queue.try_submit(
        move |_| serve_chunk(job_core, id, ticket, data),
        core.options.priorities.chunk,
    );
    if let Err(error) = submitted {
        warn!(%stream_id, correlation_id = %id, error = %error, "dropping stream chunk");
        let _ = core.streams.close_stream(stream_id);
        core.emit(ConnectionEvent::WorkRejected {
            kind: MessageKind::StreamChunk,
        });
        let _ = core.send(error_reply(id, ErrorCode::BUSY, error.to_string())).await;
    }
}

async fn serve_chunk(
    core: Arc<ConnectionCore>,
    id: CorrelationId,
    ticket: ChunkTicket,
    data: Bytes,
) -> Result<(), WorkError> {
    let stream_id = ticket.stream_id();
    let (reply, result) = match core.streams.apply(ticket, data) {
        Ok(ChunkOutcome::Accepted | ChunkOutcome::Deferred) => (
            Message::StreamChunkResponse(StreamChunkResponse {
                id,
                data: Bytes::new(),
            }),
            Ok(()),
        ),
        Ok(ChunkOutcome::Completed(payload)) => {
            debug!(%stream_id, len = payload.len(), "inbound stream complete");
            let outcome = match AssertUnwindSafe(core.handler.on_stream(stream_id, payload))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => Err(handler_panicked(
                    &core,
                    MessageKind::StreamChunk,
                    &format_panic(panic).to_string(),
                )),
            };
            core.streams.acknowledge_close(stream_id);
            match outcome {
                Ok(data) => (
                    Message::StreamChunkResponse(StreamChunkResponse { id, data }),
                    Ok(()),
                ),
                Err(error) => (error_reply(id, error.code(), error.message()), Err(error)),
            }
        }
        Err(error) => {
            warn!(%stream_id, correlation_id = %id, error = %error, "chunk rejected");
            let error = WorkError::with_code(ErrorCode::STREAM, error.to_string());
            (error_reply(id, error.code(), error.message()), Err(error))
        }
    };
    if core.send(reply).await.is_err() {
        debug!(%stream_id, correlation_id = %id, "connection closed before chunk reply");
    }
    result
}
