//! Unit tests for message layout, validation and framing.

use bincode::{Decode, Encode};
use bytes::{BufMut, Bytes, BytesMut};
use proptest::prelude::*;
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::*;

fn id(raw: u64) -> CorrelationId { CorrelationId::new(raw).expect("non-zero correlation id") }

fn stream(raw: u64) -> StreamId { StreamId::new(raw).expect("valid stream id") }

fn encode(envelope: &Envelope) -> BytesMut {
    let mut buf = BytesMut::new();
    envelope.encode(&mut buf).expect("encode envelope");
    buf
}

/// Header bytes for a kind that requires an id, with a zero id.
fn header_with_zero_id(kind: MessageKind) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(kind.type_id());
    buf.put_u64(0);
    buf.put_u8(ProtocolVersion::CURRENT.get());
    buf
}

#[rstest]
#[case::call(MessageKind::Call)]
#[case::response(MessageKind::Response)]
#[case::error(MessageKind::Error)]
#[case::stream_chunk(MessageKind::StreamChunk)]
#[case::stream_chunk_response(MessageKind::StreamChunkResponse)]
#[case::cancel(MessageKind::Cancel)]
fn decoding_without_correlation_id_fails(#[case] kind: MessageKind) {
    let buf = header_with_zero_id(kind);
    let err = Envelope::decode(&buf, ProtocolVersion::CURRENT).expect_err("id is required");
    assert_eq!(err, ProtocolError::MissingCorrelationId { kind });
}

#[test]
fn stream_chunk_layout_matches_wire_format() {
    let envelope = Envelope::current(Message::StreamChunk(StreamChunk {
        id: id(9),
        stream_id: stream(1),
        data: Bytes::from_static(b"ABCD"),
    }));
    let buf = encode(&envelope);

    let mut expected = BytesMut::new();
    expected.put_u8(MessageKind::StreamChunk.type_id());
    expected.put_u64(9);
    expected.put_u8(ProtocolVersion::CURRENT.get());
    expected.put_i64(1);
    expected.put_u32(4);
    expected.put_slice(b"ABCD");
    assert_eq!(buf, expected);
}

#[test]
fn heartbeat_carries_only_header() {
    let buf = encode(&Envelope::current(Message::Heartbeat));
    assert_eq!(
        &buf[..],
        &[
            MessageKind::Heartbeat.type_id(),
            ProtocolVersion::CURRENT.get()
        ]
    );
}

#[rstest]
#[case::zero(0)]
#[case::negative(-5)]
fn stream_chunk_rejects_non_positive_stream_id(#[case] raw: i64) {
    let mut buf = BytesMut::new();
    buf.put_u8(MessageKind::StreamChunk.type_id());
    buf.put_u64(3);
    buf.put_u8(ProtocolVersion::CURRENT.get());
    buf.put_i64(raw);
    buf.put_u32(0);

    let err = Envelope::decode(&buf, ProtocolVersion::CURRENT).expect_err("invalid stream id");
    assert_eq!(err, ProtocolError::InvalidStreamId(raw));
}

#[test]
fn unknown_message_type_is_rejected() {
    let err = Envelope::decode(&[42, 2], ProtocolVersion::CURRENT).expect_err("unknown type");
    assert_eq!(
        err,
        ProtocolError::UnknownMessageType {
            type_id: 42,
            version: 2
        }
    );
}

#[test]
fn cancel_is_unknown_to_version_one_readers() {
    let buf = encode(&Envelope::current(Message::Cancel(Cancel { id: id(4) })));
    let err = Envelope::decode(&buf, ProtocolVersion::V1).expect_err("cancel needs v2");
    assert!(matches!(
        err,
        ProtocolError::UnknownMessageType { type_id: 9, .. }
    ));
}

#[test]
fn cancel_cannot_be_written_as_version_one() {
    let envelope = Envelope::new(ProtocolVersion::V1, Message::Cancel(Cancel { id: id(4) }));
    let mut buf = BytesMut::from(&b"keep"[..]);
    let err = envelope.encode(&mut buf).expect_err("cancel needs v2");
    assert!(matches!(err, ProtocolError::KindUnavailable { .. }));
    assert_eq!(&buf[..], b"keep", "failed encode must not leave bytes behind");
}

#[test]
fn newer_header_version_is_unsupported() {
    let buf = encode(&Envelope::current(Message::Heartbeat));
    let err = Envelope::decode(&buf, ProtocolVersion::V1).expect_err("v2 header on v1 reader");
    assert_eq!(
        err,
        ProtocolError::UnsupportedVersion { version: 2, max: 1 }
    );
}

#[test]
fn version_one_error_layout_has_no_code() {
    let envelope = Envelope::new(
        ProtocolVersion::V1,
        Message::Error(ErrorMessage {
            id: id(7),
            code: ErrorCode::GENERIC,
            message: "boom".into(),
        }),
    );
    let buf = encode(&envelope);
    // kind + id + version + u16 length + "boom"
    assert_eq!(buf.len(), 1 + 8 + 1 + 2 + 4);

    let decoded = Envelope::decode(&buf, ProtocolVersion::CURRENT).expect("v1 body on v2 reader");
    assert_eq!(decoded, envelope);
}

#[test]
fn trailing_bytes_are_an_error() {
    let mut buf = encode(&Envelope::current(Message::HeartbeatResponse));
    buf.put_u8(0xff);
    let err = Envelope::decode(&buf, ProtocolVersion::CURRENT).expect_err("trailing byte");
    assert_eq!(
        err,
        ProtocolError::TrailingBytes {
            kind: MessageKind::HeartbeatResponse,
            count: 1
        }
    );
}

#[test]
fn truncated_payload_is_an_error() {
    let buf = encode(&Envelope::current(Message::Response(Response {
        id: id(1),
        payload: Bytes::from_static(b"hello"),
    })));
    let err = Envelope::decode(&buf[..buf.len() - 2], ProtocolVersion::CURRENT)
        .expect_err("truncated payload");
    assert!(matches!(
        err,
        ProtocolError::Truncated {
            field: "payload",
            needed: 5,
            remaining: 3
        }
    ));
}

#[test]
fn invalid_utf8_method_is_rejected() {
    let mut buf = BytesMut::new();
    buf.put_u8(MessageKind::Call.type_id());
    buf.put_u64(1);
    buf.put_u8(ProtocolVersion::CURRENT.get());
    buf.put_u16(2);
    buf.put_slice(&[0xc3, 0x28]);
    buf.put_u32(0);
    let err = Envelope::decode(&buf, ProtocolVersion::CURRENT).expect_err("bad utf-8");
    assert_eq!(err, ProtocolError::InvalidUtf8 { field: "method" });
}

#[test]
fn codec_skips_malformed_frame_and_keeps_reading() {
    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::new();
    buf.put_u32(2);
    buf.put_slice(&[42, 2]);
    codec
        .encode(Message::Heartbeat, &mut buf)
        .expect("encode heartbeat");

    let first = codec
        .decode(&mut buf)
        .expect("stream intact")
        .expect("first frame complete");
    assert!(matches!(
        first,
        Err(ProtocolError::UnknownMessageType { type_id: 42, .. })
    ));

    let second = codec
        .decode(&mut buf)
        .expect("stream intact")
        .expect("second frame complete")
        .expect("valid heartbeat");
    assert_eq!(second.message, Message::Heartbeat);
    assert!(buf.is_empty());
}

#[test]
fn codec_waits_for_complete_frame() {
    let mut codec = MessageCodec::default();
    let mut full = BytesMut::new();
    codec
        .encode(
            Message::Event(Event {
                name: "tick".into(),
                payload: Bytes::from_static(b"1"),
            }),
            &mut full,
        )
        .expect("encode event");

    let mut partial = full.split_to(full.len() - 1);
    assert!(codec.decode(&mut partial).expect("no error").is_none());
    partial.unsplit(full);
    assert!(codec.decode(&mut partial).expect("no error").is_some());
}

#[test]
fn codec_rejects_oversized_frames() {
    let mut codec = MessageCodec::default().with_max_frame_length(8);
    let mut buf = BytesMut::new();
    buf.put_u32(9);
    let err = codec.decode(&mut buf).expect_err("oversized frame");
    assert!(matches!(
        err,
        CodecError::Framing(FramingError::OversizedFrame { size: 9, max: 8 })
    ));

    let err = codec
        .encode(
            Message::Response(Response {
                id: id(1),
                payload: Bytes::from_static(b"too large for eight"),
            }),
            &mut buf,
        )
        .expect_err("oversized outbound frame");
    assert!(matches!(err, CodecError::Framing(_)));
}

#[test]
fn codec_reports_eof_mid_frame() {
    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::new();
    buf.put_u32(10);
    buf.put_slice(&[1, 2, 3]);
    let err = codec.decode_eof(&mut buf).expect_err("eof mid frame");
    assert!(matches!(
        err,
        CodecError::Eof(EofError::MidFrame {
            bytes_received: 3,
            expected: 10
        })
    ));
}

#[derive(Debug, PartialEq, Encode, Decode)]
struct Transfer {
    account: u32,
    amount: i64,
    memo: String,
}

#[test]
fn typed_call_arguments_round_trip() {
    let args = Transfer {
        account: 17,
        amount: -250,
        memo: "rent".into(),
    };
    let call = Call::with_args(id(5), "ledger.transfer", &args).expect("encode args");
    let buf = encode(&Envelope::current(Message::Call(call)));
    let decoded = Envelope::decode(&buf, ProtocolVersion::CURRENT).expect("decode call");

    let Message::Call(call) = decoded.message else {
        panic!("expected a call, got {:?}", decoded.message);
    };
    assert_eq!(call.method, "ledger.transfer");
    assert_eq!(call.args::<Transfer>().expect("decode args"), args);
}

fn correlation_id() -> impl Strategy<Value = CorrelationId> {
    (1..=u64::MAX).prop_map(id)
}

fn payload() -> impl Strategy<Value = Bytes> {
    proptest::collection::vec(any::<u8>(), 0..64).prop_map(Bytes::from)
}

fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (correlation_id(), ".{0,16}", payload()).prop_map(|(id, method, payload)| {
            Message::Call(Call {
                id,
                method,
                payload,
            })
        }),
        (correlation_id(), payload()).prop_map(|(id, payload)| Message::Response(Response {
            id,
            payload
        })),
        (correlation_id(), any::<u32>(), ".{0,16}").prop_map(|(id, code, message)| {
            Message::Error(ErrorMessage {
                id,
                code: ErrorCode(code),
                message,
            })
        }),
        (".{0,16}", payload()).prop_map(|(name, payload)| Message::Event(Event { name, payload })),
        (correlation_id(), 1..=StreamId::MAX, payload()).prop_map(|(id, raw, data)| {
            Message::StreamChunk(StreamChunk {
                id,
                stream_id: stream(raw),
                data,
            })
        }),
        (correlation_id(), payload()).prop_map(|(id, data)| {
            Message::StreamChunkResponse(StreamChunkResponse { id, data })
        }),
        Just(Message::Heartbeat),
        Just(Message::HeartbeatResponse),
        correlation_id().prop_map(|id| Message::Cancel(Cancel { id })),
    ]
}

proptest! {
    #[test]
    fn every_message_round_trips(message in message()) {
        let envelope = Envelope::current(message);
        let buf = encode(&envelope);
        let decoded = Envelope::decode(&buf, ProtocolVersion::CURRENT)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(decoded, envelope);
    }

    #[test]
    fn framed_messages_round_trip(messages in proptest::collection::vec(message(), 1..8)) {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        for message in &messages {
            codec
                .encode(message.clone(), &mut buf)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        let mut decoded = Vec::new();
        while let Some(item) = codec
            .decode(&mut buf)
            .map_err(|e| TestCaseError::fail(e.to_string()))?
        {
            let envelope = item.map_err(|e| TestCaseError::fail(e.to_string()))?;
            decoded.push(envelope.message);
        }
        prop_assert_eq!(decoded, messages);
    }
}
