//! Length-prefixed framing of messages over a byte stream.
//!
//! Each message is preceded by a big-endian `u32` holding the body length.
//! The decoder always consumes a whole frame before interpreting it, so a
//! malformed body is reported as an `Err` *item* and the stream stays in
//! sync. Only a broken length prefix or a truncated stream is fatal.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{CodecError, EofError, Envelope, FramingError, Message, ProtocolError, ProtocolVersion};

const LENGTH_PREFIX: usize = 4;

/// Largest frame accepted by default (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Tokio codec turning a byte stream into [`Envelope`]s and back.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use rpcwire::message::{Message, MessageCodec, ProtocolVersion};
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = MessageCodec::new(ProtocolVersion::CURRENT);
/// let mut buf = BytesMut::new();
/// codec.encode(Message::Heartbeat, &mut buf).expect("encode heartbeat");
/// let envelope = codec
///     .decode(&mut buf)
///     .expect("frame intact")
///     .expect("complete frame")
///     .expect("valid message");
/// assert_eq!(envelope.message, Message::Heartbeat);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct MessageCodec {
    version: ProtocolVersion,
    max_frame_length: usize,
}

impl MessageCodec {
    /// Create a codec writing and accepting up to `version`.
    #[must_use]
    pub const fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    /// Override the largest accepted frame body.
    #[must_use]
    pub const fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    /// Version written by the encoder.
    #[must_use]
    pub const fn version(&self) -> ProtocolVersion { self.version }

    /// Largest frame body accepted in either direction.
    #[must_use]
    pub const fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for MessageCodec {
    fn default() -> Self { Self::new(ProtocolVersion::CURRENT) }
}

impl Decoder for MessageCodec {
    type Item = Result<Envelope, ProtocolError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len == 0 {
            return Err(FramingError::EmptyFrame.into());
        }
        if len > self.max_frame_length {
            return Err(FramingError::OversizedFrame {
                size: len,
                max: self.max_frame_length,
            }
            .into());
        }
        let total = LENGTH_PREFIX + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX);
        let frame = src.split_to(len);
        Ok(Some(Envelope::decode(&frame, self.version)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        match src.len() {
            0 => Ok(None),
            received if received < LENGTH_PREFIX => Err(EofError::MidHeader {
                bytes_received: received,
                header_size: LENGTH_PREFIX,
            }
            .into()),
            received => {
                let mut prefix = [0u8; LENGTH_PREFIX];
                prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
                Err(EofError::MidFrame {
                    bytes_received: received - LENGTH_PREFIX,
                    expected: u32::from_be_bytes(prefix) as usize,
                }
                .into())
            }
        }
    }
}

impl Encoder<Envelope> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        dst.put_u32(0);
        if let Err(error) = item.encode(dst) {
            dst.truncate(start);
            return Err(error.into());
        }
        let len = dst.len() - start - LENGTH_PREFIX;
        let prefix = match u32::try_from(len) {
            Ok(prefix) if len <= self.max_frame_length => prefix,
            _ => {
                dst.truncate(start);
                return Err(FramingError::OversizedFrame {
                    size: len,
                    max: self.max_frame_length,
                }
                .into());
            }
        };
        dst[start..start + LENGTH_PREFIX].copy_from_slice(&prefix.to_be_bytes());
        Ok(())
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let envelope = Envelope::new(self.version, item);
        Encoder::<Envelope>::encode(self, envelope, dst)
    }
}
