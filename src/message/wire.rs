//! Byte layout of message headers and bodies.
//!
//! Integers are big-endian. Text fields carry a `u16` length prefix and byte
//! fields a `u32` length prefix. Decoding works on one complete frame and
//! rejects bytes left over after the last field.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{
    Call,
    Cancel,
    CorrelationId,
    Envelope,
    ErrorCode,
    ErrorMessage,
    Event,
    Message,
    MessageKind,
    ProtocolError,
    ProtocolVersion,
    Response,
    StreamChunk,
    StreamChunkResponse,
    StreamId,
};

/// Smallest possible header: kind and version without a correlation id.
pub const MIN_HEADER_LEN: usize = 2;

impl Envelope {
    /// Append the encoded message to `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::KindUnavailable`] if the kind does not exist
    /// in `self.version`, or [`ProtocolError::FieldTooLong`] if a field
    /// exceeds its length prefix. `dst` is left unchanged on error.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let start = dst.len();
        let result = self.encode_unchecked(dst);
        if result.is_err() {
            dst.truncate(start);
        }
        result
    }

    fn encode_unchecked(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let kind = self.message.kind();
        if kind.since() > self.version {
            return Err(ProtocolError::KindUnavailable {
                kind,
                since: kind.since().get(),
            });
        }
        dst.put_u8(kind.type_id());
        if let Some(id) = self.message.correlation_id() {
            dst.put_u64(id.get());
        }
        dst.put_u8(self.version.get());

        match &self.message {
            Message::Call(call) => {
                put_str(dst, "method", &call.method)?;
                put_bytes(dst, "payload", &call.payload)
            }
            Message::Response(response) => put_bytes(dst, "payload", &response.payload),
            Message::Error(error) => {
                if self.version >= ProtocolVersion::V2 {
                    dst.put_u32(error.code.0);
                }
                put_str(dst, "message", &error.message)
            }
            Message::Event(event) => {
                put_str(dst, "name", &event.name)?;
                put_bytes(dst, "payload", &event.payload)
            }
            Message::StreamChunk(chunk) => {
                dst.put_i64(stream_id_to_wire(chunk.stream_id));
                put_bytes(dst, "data", &chunk.data)
            }
            Message::StreamChunkResponse(response) => put_bytes(dst, "data", &response.data),
            Message::Heartbeat | Message::HeartbeatResponse | Message::Cancel(_) => Ok(()),
        }
    }

    /// Decode exactly one message from `src`.
    ///
    /// `negotiated` is the highest version the reader accepts; the header may
    /// declare an older one, in which case the older body layout is used.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the kind is unknown for the version,
    /// a required correlation id is absent, a field is truncated or invalid,
    /// or bytes remain after the last field.
    pub fn decode(src: &[u8], negotiated: ProtocolVersion) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(src);
        let type_id = reader.u8("message type")?;
        let kind = MessageKind::resolve(type_id, negotiated).ok_or(
            ProtocolError::UnknownMessageType {
                type_id,
                version: negotiated.get(),
            },
        )?;
        let id = if kind.requires_id() {
            let raw = reader.u64("correlation id")?;
            Some(CorrelationId::new(raw).ok_or(ProtocolError::MissingCorrelationId { kind })?)
        } else {
            None
        };
        let raw_version = reader.u8("version")?;
        let version = ProtocolVersion::new(raw_version)
            .filter(|version| *version <= negotiated)
            .ok_or(ProtocolError::UnsupportedVersion {
                version: raw_version,
                max: negotiated.get(),
            })?;
        if kind.since() > version {
            return Err(ProtocolError::UnknownMessageType {
                type_id,
                version: version.get(),
            });
        }

        let message = decode_body(kind, id, version, &mut reader)?;
        reader.finish(kind)?;
        Ok(Self { version, message })
    }
}

fn decode_body(
    kind: MessageKind,
    id: Option<CorrelationId>,
    version: ProtocolVersion,
    reader: &mut Reader<'_>,
) -> Result<Message, ProtocolError> {
    let require = |id: Option<CorrelationId>| id.ok_or(ProtocolError::MissingCorrelationId { kind });
    let message = match (kind, version) {
        (MessageKind::Call, _) => Message::Call(Call {
            id: require(id)?,
            method: reader.string("method")?,
            payload: reader.bytes("payload")?,
        }),
        (MessageKind::Response, _) => Message::Response(Response {
            id: require(id)?,
            payload: reader.bytes("payload")?,
        }),
        (MessageKind::Error, ProtocolVersion::V1) => Message::Error(ErrorMessage {
            id: require(id)?,
            code: ErrorCode::GENERIC,
            message: reader.string("message")?,
        }),
        (MessageKind::Error, _) => Message::Error(ErrorMessage {
            id: require(id)?,
            code: ErrorCode(reader.u32("error code")?),
            message: reader.string("message")?,
        }),
        (MessageKind::Event, _) => Message::Event(Event {
            name: reader.string("name")?,
            payload: reader.bytes("payload")?,
        }),
        (MessageKind::StreamChunk, _) => {
            let id = require(id)?;
            let raw = reader.i64("stream id")?;
            let stream_id = u64::try_from(raw)
                .ok()
                .and_then(StreamId::new)
                .ok_or(ProtocolError::InvalidStreamId(raw))?;
            Message::StreamChunk(StreamChunk {
                id,
                stream_id,
                data: reader.bytes("data")?,
            })
        }
        (MessageKind::StreamChunkResponse, _) => Message::StreamChunkResponse(StreamChunkResponse {
            id: require(id)?,
            data: reader.bytes("data")?,
        }),
        (MessageKind::Heartbeat, _) => Message::Heartbeat,
        (MessageKind::HeartbeatResponse, _) => Message::HeartbeatResponse,
        (MessageKind::Cancel, _) => Message::Cancel(Cancel { id: require(id)? }),
    };
    Ok(message)
}

fn stream_id_to_wire(stream_id: StreamId) -> i64 {
    // `StreamId::new` caps values at `i64::MAX`.
    i64::try_from(stream_id.get()).unwrap_or(i64::MAX)
}

fn put_str(dst: &mut BytesMut, field: &'static str, value: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: value.len(),
        max: usize::from(u16::MAX),
    })?;
    dst.put_u16(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

fn put_bytes(dst: &mut BytesMut, field: &'static str, value: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: value.len(),
        max: u32::MAX as usize,
    })?;
    dst.put_u32(len);
    dst.put_slice(value);
    Ok(())
}

/// Bounds-checked cursor over a single frame.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self { Self { buf } }

    fn need(&self, field: &'static str, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                field,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        self.need(field, 1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, ProtocolError> {
        self.need(field, 2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        self.need(field, 4)?;
        Ok(self.buf.get_u32())
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, ProtocolError> {
        self.need(field, 8)?;
        Ok(self.buf.get_u64())
    }

    fn i64(&mut self, field: &'static str) -> Result<i64, ProtocolError> {
        self.need(field, 8)?;
        Ok(self.buf.get_i64())
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.need(field, len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn bytes(&mut self, field: &'static str) -> Result<Bytes, ProtocolError> {
        let len = self.u32(field)? as usize;
        Ok(Bytes::copy_from_slice(self.take(field, len)?))
    }

    fn string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let len = usize::from(self.u16(field)?);
        let raw = self.take(field, len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8 { field })
    }

    fn finish(&self, kind: MessageKind) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes {
                kind,
                count: self.buf.len(),
            })
        }
    }
}
