//! A running peer-to-peer connection.
//!
//! [`Connection::spawn`] splits a byte stream and starts three tasks:
//!
//! - a reader that decodes messages in order and routes them,
//! - a writer that owns the outbound half and records local activity,
//! - the keep-alive checker.
//!
//! Inbound calls, events and stream chunks run on the connection's
//! [`PriorityDispatchQueue`]; their replies travel back through the writer.
//! Outbound calls and stream chunks are matched to replies by correlation id.
//! When the connection stops, for whatever reason, open streams are
//! force-closed, waiting callers fail with [`CallError::ConnectionClosed`]
//! and queued work is discarded.

mod counter;
mod error;
mod event;
mod handler;
mod options;
mod pending;
mod router;
mod routes;
mod writer;

use std::{
    future::Future,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
    task::TaskTracker,
};
use tracing::{debug, info};

use self::{counter::ActiveConnection, pending::PendingCalls};
use crate::{
    dispatch::{DispatchError, PriorityDispatchQueue, ShutdownMode, WorkError, WorkHandle},
    keepalive::{KeepAliveMonitor, KeepAliveState},
    message::{
        Call,
        Cancel,
        CorrelationId,
        Event,
        Message,
        MessageCodec,
        MessageKind,
        Payload,
        StreamChunk,
        StreamId,
    },
    stream::{
        ChunkOutcome,
        ChunkSender,
        ChunkTransport,
        StreamError,
        StreamRegistry,
        StreamScope,
        StreamScopeOptions,
    },
};

pub use counter::active_connection_count;
pub use error::{CallError, ConnectionError};
pub use event::{CloseReason, ConnectionEvent, ConnectionEvents};
pub use handler::RpcHandler;
pub use options::{ConnectionOptions, DEFAULT_OUTBOUND_CAPACITY};
pub use routes::{MethodRouter, RouteError};

/// State shared by a connection's tasks, its workers and its handle.
pub(crate) struct ConnectionCore {
    options: ConnectionOptions,
    outbound: mpsc::Sender<Message>,
    queue: PriorityDispatchQueue,
    streams: StreamRegistry,
    keepalive: KeepAliveMonitor,
    pending: PendingCalls,
    running: DashMap<CorrelationId, CancellationToken>,
    handler: Arc<dyn RpcHandler>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: CancellationToken,
    close_reason: OnceLock<CloseReason>,
}

impl ConnectionCore {
    fn emit(&self, event: ConnectionEvent) {
        // Nobody may be listening.
        let _ = self.events.send(event);
    }

    /// Stop the connection. The first reason recorded wins.
    fn close(&self, reason: CloseReason) {
        if self.close_reason.set(reason).is_ok() {
            debug!(reason = %self.close_reason(), "connection closing");
        }
        self.shutdown.cancel();
    }

    fn close_reason(&self) -> CloseReason {
        self.close_reason.get().cloned().unwrap_or(CloseReason::Local)
    }

    /// Queue `message` for the writer.
    async fn send(&self, message: Message) -> Result<(), CallError> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(CallError::ConnectionClosed),
            sent = self.outbound.send(message) => sent.map_err(|_| CallError::ConnectionClosed),
        }
    }
}

/// Removes a pending entry if its waiter goes away first.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) { self.pending.discard(self.id); }
}

#[async_trait]
impl ChunkTransport for ConnectionCore {
    async fn send_chunk(&self, stream_id: StreamId, data: Bytes) -> Result<Bytes, StreamError> {
        let (id, reply) = self.pending.register();
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        self.send(Message::StreamChunk(StreamChunk { id, stream_id, data }))
            .await
            .map_err(|e| e.into_stream_error(stream_id))?;
        reply
            .await
            .unwrap_or(Err(CallError::ConnectionClosed))
            .map_err(|e| e.into_stream_error(stream_id))
    }
}

async fn keepalive_loop(core: Arc<ConnectionCore>) {
    if let Err(error) = core.keepalive.run(&core.outbound, &core.shutdown).await {
        core.emit(ConnectionEvent::LivenessFailure(error));
        core.close(CloseReason::Liveness(error));
    }
}

/// Handle to a running connection.
///
/// Dropping the handle closes the connection.
pub struct Connection {
    core: Arc<ConnectionCore>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("options", &self.core.options)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Start serving `io`, routing inbound work to `handler`.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when `options` fail validation.
    pub fn spawn<T, H>(
        io: T,
        handler: H,
        options: ConnectionOptions,
    ) -> Result<(Self, ConnectionEvents), ConnectionError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
        H: RpcHandler,
    {
        options.validate()?;
        let queue = PriorityDispatchQueue::new(options.queue)?;
        let (outbound, outbound_rx) = mpsc::channel(options.outbound_capacity);
        let (events_tx, events) = ConnectionEvents::channel();
        let core = Arc::new(ConnectionCore {
            options,
            outbound,
            queue,
            streams: StreamRegistry::new(options.streams),
            keepalive: KeepAliveMonitor::new(options.keepalive),
            pending: PendingCalls::new(),
            running: DashMap::new(),
            handler: Arc::new(handler),
            events: events_tx,
            shutdown: CancellationToken::new(),
            close_reason: OnceLock::new(),
        });

        let codec = MessageCodec::new(options.protocol_version)
            .with_max_frame_length(options.max_frame_length);
        let (read_half, write_half) = tokio::io::split(io);
        let active = ActiveConnection::new();
        let tracker = TaskTracker::new();
        tracker.spawn(writer::write_loop(
            Arc::clone(&core),
            outbound_rx,
            FramedWrite::new(write_half, codec),
        ));
        tracker.spawn(keepalive_loop(Arc::clone(&core)));
        tracker.spawn({
            let core = Arc::clone(&core);
            async move {
                let _active = active;
                router::read_loop(core, FramedRead::new(read_half, codec)).await;
            }
        });
        tracker.close();
        info!(
            version = %options.protocol_version,
            keepalive = options.keepalive.is_enabled(),
            workers = options.queue.threads,
            "connection started"
        );
        Ok((
            Self {
                core,
                tracker,
            },
            events,
        ))
    }

    /// Options the connection was started with.
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions { &self.core.options }

    /// Whether the connection has begun stopping.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.core.shutdown.is_cancelled() }

    /// Current keep-alive state.
    #[must_use]
    pub fn keepalive_state(&self) -> KeepAliveState { self.core.keepalive.state() }

    /// Outbound calls and stream chunks awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize { self.core.pending.len() }

    /// Streams of this connection in both directions.
    #[must_use]
    pub fn streams(&self) -> &StreamRegistry { &self.core.streams }

    /// Queue executing this connection's inbound work.
    #[must_use]
    pub fn queue(&self) -> &PriorityDispatchQueue { &self.core.queue }

    /// Send a call without waiting for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ConnectionClosed`] if the connection has stopped.
    pub async fn start_call(
        &self,
        method: impl Into<String>,
        payload: Bytes,
    ) -> Result<PendingCall, CallError> {
        let (id, reply) = self.core.pending.register();
        let call = PendingCall {
            id,
            reply,
            core: Arc::clone(&self.core),
        };
        self.core
            .send(Message::Call(Call {
                id,
                method: method.into(),
                payload,
            }))
            .await?;
        Ok(call)
    }

    /// Call `method` on the peer and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Remote`] when the peer answers with an error, or
    /// another [`CallError`] if the call was cancelled or the connection
    /// stopped.
    pub async fn call(&self, method: impl Into<String>, payload: Bytes) -> Result<Bytes, CallError> {
        self.start_call(method, payload).await?.response().await
    }

    /// Call `method` with bincode-encoded arguments and decode the reply.
    ///
    /// # Errors
    ///
    /// As [`Connection::call`], plus [`CallError::Payload`] when either side
    /// of the conversion fails.
    pub async fn call_typed<A, R>(&self, method: impl Into<String>, args: &A) -> Result<R, CallError>
    where
        A: Payload,
        R: Payload,
    {
        let payload = args
            .to_payload()
            .map_err(|e| CallError::Payload(e.to_string()))?;
        let reply = self.call(method, payload).await?;
        R::from_payload(&reply).map_err(|e| CallError::Payload(e.to_string()))
    }

    /// Send a fire-and-forget event.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ConnectionClosed`] if the connection has stopped.
    pub async fn notify(&self, name: impl Into<String>, payload: Bytes) -> Result<(), CallError> {
        self.core
            .send(Message::Event(Event {
                name: name.into(),
                payload,
            }))
            .await
    }

    /// Abandon an outbound call.
    ///
    /// The waiting caller gets [`CallError::Cancelled`] at once. The peer is
    /// told with a `Cancel` message when the protocol version has one.
    /// Returns `false` if the call was not pending.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ConnectionClosed`] if the `Cancel` message could
    /// not be queued.
    pub async fn cancel(&self, id: CorrelationId) -> Result<bool, CallError> {
        if !self.core.pending.resolve(id, Err(CallError::Cancelled)) {
            return Ok(false);
        }
        if self.core.options.protocol_version < MessageKind::Cancel.since() {
            debug!(correlation_id = %id, "peer cannot be told about the cancel");
            return Ok(true);
        }
        self.core.send(Message::Cancel(Cancel { id })).await?;
        Ok(true)
    }

    /// Transfer `payload` as a chunked stream with the connection's default
    /// stream options, returning the peer's answer to the close chunk.
    ///
    /// # Errors
    ///
    /// Returns a [`StreamError`] if a chunk is rejected, compression fails or
    /// the connection stops mid-transfer.
    pub async fn send_stream(&self, payload: Bytes) -> Result<Bytes, StreamError> {
        self.transfer(payload, None).await
    }

    /// Transfer `payload` with explicit stream options.
    ///
    /// Compression is not announced on the wire. The peer inflates a stream
    /// only if the scope receiving it is compressed too, either through its
    /// connection default or through its own [`Connection::open_stream`]
    /// for this id. When `options` compress differently from the peer, the
    /// peer's handler receives the bytes as sent, still deflated. Outbound
    /// ids count up from 1 per connection, so both sides can agree on an id
    /// ahead of time.
    ///
    /// # Errors
    ///
    /// As [`Connection::send_stream`].
    pub async fn send_stream_with(
        &self,
        payload: Bytes,
        options: StreamScopeOptions,
    ) -> Result<Bytes, StreamError> {
        self.transfer(payload, Some(options)).await
    }

    async fn transfer(
        &self,
        payload: Bytes,
        options: Option<StreamScopeOptions>,
    ) -> Result<Bytes, StreamError> {
        let scope = self.core.streams.open_outbound(options)?;
        let stream_id = scope.stream_id();
        let sender = ChunkSender::new(Arc::clone(&self.core), scope)
            .with_cancellation(self.core.shutdown.child_token());
        let result = sender.send(payload).await;
        self.core.streams.release_outbound(stream_id);
        result
    }

    /// Prepare an inbound stream with options other than the defaults
    /// before the peer's first chunk arrives.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadyOpen`] if the stream is live.
    pub fn open_stream(
        &self,
        stream_id: StreamId,
        options: StreamScopeOptions,
    ) -> Result<Arc<StreamScope>, StreamError> {
        self.core.streams.open_stream(stream_id, options)
    }

    /// Apply a chunk to an inbound stream outside the reader, bypassing the
    /// dispatch queue.
    ///
    /// # Errors
    ///
    /// See [`StreamRegistry::feed_chunk`].
    pub fn feed_chunk(&self, stream_id: StreamId, data: Bytes) -> Result<ChunkOutcome, StreamError> {
        self.core.streams.feed_chunk(stream_id, data)
    }

    /// Force-close a stream.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownStream`] if it is not live.
    pub fn close_stream(&self, stream_id: StreamId) -> Result<(), StreamError> {
        self.core.streams.close_stream(stream_id)
    }

    /// Run application work on the connection's dispatch queue.
    ///
    /// # Errors
    ///
    /// See [`PriorityDispatchQueue::try_submit`].
    pub fn submit_work<F, Fut>(&self, job: F, priority: i32) -> Result<WorkHandle, DispatchError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        self.core.queue.try_submit(job, priority)
    }

    /// Stop the connection and wait for its tasks.
    ///
    /// Inbound work is settled first according to `mode`, and its replies
    /// are still written. Then the reader, writer and keep-alive tasks stop.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.core.queue.shutdown(mode).await;
        self.core.close(CloseReason::Local);
        self.tracker.wait().await;
    }

    /// Wait until the connection's tasks have all finished.
    pub async fn closed(&self) { self.tracker.wait().await; }
}

impl Drop for Connection {
    fn drop(&mut self) { self.core.close(CloseReason::Dropped); }
}

/// An outbound call whose reply has not been awaited yet.
///
/// Dropping it abandons the call locally without telling the peer.
#[derive(Debug)]
pub struct PendingCall {
    id: CorrelationId,
    reply: oneshot::Receiver<pending::Reply>,
    core: Arc<ConnectionCore>,
}

impl std::fmt::Debug for ConnectionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCore")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PendingCall {
    /// Correlation id of the call, usable with [`Connection::cancel`].
    #[must_use]
    pub const fn id(&self) -> CorrelationId { self.id }

    /// Wait for the reply.
    ///
    /// # Errors
    ///
    /// As [`Connection::call`].
    pub async fn response(mut self) -> Result<Bytes, CallError> {
        (&mut self.reply)
            .await
            .unwrap_or(Err(CallError::ConnectionClosed))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) { self.core.pending.discard(self.id); }
}
