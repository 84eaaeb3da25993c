//! Concrete message variants.

use bytes::Bytes;

use super::{CorrelationId, ErrorCode, MessageKind, ProtocolVersion, StreamId};

/// Request expecting a [`Response`] or [`ErrorMessage`] with the same id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub id: CorrelationId,
    pub method: String,
    pub payload: Bytes,
}

/// Successful reply to a [`Call`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub id: CorrelationId,
    pub payload: Bytes,
}

/// Failed reply to a [`Call`] or [`StreamChunk`].
///
/// Version 1 bodies carry no code and decode as [`ErrorCode::GENERIC`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMessage {
    pub id: CorrelationId,
    pub code: ErrorCode,
    pub message: String,
}

/// Fire-and-forget notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub payload: Bytes,
}

/// One fragment of a chunked transfer.
///
/// An empty `data` is the close sentinel: no further chunks follow for
/// `stream_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamChunk {
    pub id: CorrelationId,
    pub stream_id: StreamId,
    pub data: Bytes,
}

impl StreamChunk {
    /// Whether this chunk closes its stream.
    #[must_use]
    pub fn is_close(&self) -> bool { self.data.is_empty() }
}

/// Acknowledgement of a [`StreamChunk`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamChunkResponse {
    pub id: CorrelationId,
    pub data: Bytes,
}

/// Request to abandon the call with the given id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cancel {
    pub id: CorrelationId,
}

/// Every message understood by the protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Call(Call),
    Response(Response),
    Error(ErrorMessage),
    Event(Event),
    StreamChunk(StreamChunk),
    StreamChunkResponse(StreamChunkResponse),
    Heartbeat,
    HeartbeatResponse,
    Cancel(Cancel),
}

impl Message {
    /// Discriminator of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Call(_) => MessageKind::Call,
            Self::Response(_) => MessageKind::Response,
            Self::Error(_) => MessageKind::Error,
            Self::Event(_) => MessageKind::Event,
            Self::StreamChunk(_) => MessageKind::StreamChunk,
            Self::StreamChunkResponse(_) => MessageKind::StreamChunkResponse,
            Self::Heartbeat => MessageKind::Heartbeat,
            Self::HeartbeatResponse => MessageKind::HeartbeatResponse,
            Self::Cancel(_) => MessageKind::Cancel,
        }
    }

    /// Correlation id carried by this message, if its kind has one.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::Call(Call { id, .. })
            | Self::Response(Response { id, .. })
            | Self::Error(ErrorMessage { id, .. })
            | Self::StreamChunk(StreamChunk { id, .. })
            | Self::StreamChunkResponse(StreamChunkResponse { id, .. })
            | Self::Cancel(Cancel { id }) => Some(*id),
            Self::Event(_) | Self::Heartbeat | Self::HeartbeatResponse => None,
        }
    }
}

/// A message together with the protocol version its body is written in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub version: ProtocolVersion,
    pub message: Message,
}

impl Envelope {
    /// Wrap `message` for the given version.
    #[must_use]
    pub const fn new(version: ProtocolVersion, message: Message) -> Self { Self { version, message } }

    /// Wrap `message` for [`ProtocolVersion::CURRENT`].
    #[must_use]
    pub const fn current(message: Message) -> Self { Self::new(ProtocolVersion::CURRENT, message) }
}
