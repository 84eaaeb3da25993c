//! End-to-end behaviour of connections over in-memory streams.

use std::{num::NonZeroUsize, time::Duration};

use bytes::Bytes;
use rpcwire::{
    CallError,
    ConnectionEvent,
    ConnectionOptions,
    ErrorCode,
    MethodRouter,
    ProtocolVersion,
    ShutdownMode,
    StreamId,
    connection::CloseReason,
    dispatch::ParallelQueueOptions,
    keepalive::{KeepAliveOptions, KeepAliveState},
    message::{Call, ErrorMessage, Message, ProtocolError, StreamChunk, StreamChunkResponse},
    stream::{CompressionConfig, StreamScopeOptions},
};
use rpcwire_testing::{
    RecordingHandler,
    connected_pair,
    small_options,
    spawn_with_raw_peer,
};
use rstest::rstest;
use tokio::time::sleep;

fn id(raw: u64) -> rpcwire::CorrelationId { rpcwire::CorrelationId::new(raw).expect("non-zero") }

fn stream(raw: u64) -> StreamId { StreamId::new(raw).expect("valid stream id") }

fn single_slot() -> ConnectionOptions {
    ConnectionOptions::new(ParallelQueueOptions::new(1, 1).expect("valid queue"))
}

#[rstest]
#[tokio::test]
async fn call_returns_the_handler_reply(small_options: ConnectionOptions) {
    let pair = connected_pair((), RecordingHandler::default(), small_options);
    let reply = pair.client.call("echo", Bytes::from_static(b"ping")).await;
    assert_eq!(reply, Ok(Bytes::from_static(b"ping")));
    assert_eq!(pair.client.pending_requests(), 0);
}

#[rstest]
#[tokio::test]
async fn typed_calls_use_bincode_payloads(small_options: ConnectionOptions) {
    let router = MethodRouter::new()
        .typed_method("add", |(a, b): (u64, u64), _| async move { Ok(a + b) })
        .expect("registered");
    let pair = connected_pair((), router, small_options);
    let sum: u64 = pair
        .client
        .call_typed("add", &(40u64, 2u64))
        .await
        .expect("call succeeds");
    assert_eq!(sum, 42);
}

#[rstest]
#[case::application_error("fail", ErrorCode(42))]
#[case::unknown_method("nope", ErrorCode::UNKNOWN_METHOD)]
#[tokio::test]
async fn handler_errors_keep_their_code(
    small_options: ConnectionOptions,
    #[case] method: &str,
    #[case] code: ErrorCode,
) {
    let pair = connected_pair((), RecordingHandler::default(), small_options);
    let err = pair
        .client
        .call(method, Bytes::new())
        .await
        .expect_err("handler refuses");
    assert!(matches!(err, CallError::Remote { code: got, .. } if got == code), "{err:?}");
}

#[rstest]
#[tokio::test]
async fn handler_panic_fails_only_that_call(small_options: ConnectionOptions) {
    let mut pair = connected_pair((), RecordingHandler::default(), small_options);
    let err = pair
        .client
        .call("panic", Bytes::new())
        .await
        .expect_err("handler panicked");
    assert!(matches!(
        &err,
        CallError::Remote { code, message } if *code == ErrorCode::GENERIC && message.contains("handler exploded")
    ));
    assert!(matches!(
        pair.server_events.recv().await,
        Some(ConnectionEvent::WorkFailed { .. })
    ));
    assert_eq!(
        pair.client.call("echo", Bytes::from_static(b"still up")).await,
        Ok(Bytes::from_static(b"still up"))
    );
}

#[rstest]
#[tokio::test]
async fn events_reach_the_peer_handler(small_options: ConnectionOptions) {
    let handler = RecordingHandler::default();
    let pair = connected_pair((), handler.clone(), small_options);
    pair.client
        .notify("tick", Bytes::from_static(b"1"))
        .await
        .expect("queued");
    handler.wait_until(|h| !h.events().is_empty()).await;
    assert_eq!(handler.events(), vec![("tick".to_owned(), Bytes::from_static(b"1"))]);
}

#[rstest]
#[case::plain(StreamScopeOptions::default())]
#[case::compressed(StreamScopeOptions::default().with_compression(CompressionConfig::default()))]
#[tokio::test]
async fn large_payload_streams_in_chunks(
    small_options: ConnectionOptions,
    #[case] streams: StreamScopeOptions,
) {
    let handler = RecordingHandler::default();
    let options = small_options.with_streams(streams);
    let pair = connected_pair((), handler.clone(), options);
    let payload: Bytes = (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();

    let reply = pair
        .client
        .send_stream(payload.clone())
        .await
        .expect("transfer completes");

    assert_eq!(reply, Bytes::from("200000"));
    assert_eq!(handler.streams(), vec![(stream(1), payload)]);
    assert!(pair.client.streams().is_empty());
    assert!(pair.server.streams().is_empty());
}

#[rstest]
#[tokio::test]
async fn chunks_are_bounded_and_sent_one_at_a_time(small_options: ConnectionOptions) {
    let options = small_options.with_streams(
        StreamScopeOptions::default()
            .with_max_stream_content_length(NonZeroUsize::new(4).expect("non-zero")),
    );
    let (connection, _events, mut peer) =
        spawn_with_raw_peer((), options, ProtocolVersion::CURRENT);

    let transfer = tokio::spawn(async move {
        let reply = connection
            .send_stream(Bytes::from_static(b"ABCDEFG"))
            .await;
        (connection, reply)
    });

    let mut seen = Vec::new();
    loop {
        let Message::StreamChunk(StreamChunk { id, stream_id, data }) = peer.recv_message().await else {
            panic!("expected a stream chunk");
        };
        assert_eq!(stream_id, stream(1));
        seen.push(data.clone());
        let reply = if data.is_empty() {
            Bytes::from_static(b"done")
        } else {
            Bytes::new()
        };
        peer.send(Message::StreamChunkResponse(StreamChunkResponse { id, data: reply }))
            .await
            .expect("reply sent");
        if data.is_empty() {
            break;
        }
    }

    let (_connection, reply) = transfer.await.expect("join");
    assert_eq!(reply, Ok(Bytes::from_static(b"done")));
    assert_eq!(
        seen,
        vec![
            Bytes::from_static(b"ABCD"),
            Bytes::from_static(b"EFG"),
            Bytes::new()
        ]
    );
}

#[rstest]
#[tokio::test]
async fn chunks_after_close_are_rejected(small_options: ConnectionOptions) {
    let handler = RecordingHandler::default();
    let (_connection, _events, mut peer) =
        spawn_with_raw_peer(handler.clone(), small_options, ProtocolVersion::CURRENT);

    let expected_replies = [Bytes::new(), Bytes::from("3")];
    for ((raw, data), expected) in [(1, &b"abc"[..]), (2, &b""[..])]
        .into_iter()
        .zip(expected_replies)
    {
        peer.send(Message::StreamChunk(StreamChunk {
            id: id(raw),
            stream_id: stream(7),
            data: Bytes::from_static(data),
        }))
        .await
        .expect("chunk sent");
        assert_eq!(
            peer.recv_message().await,
            Message::StreamChunkResponse(StreamChunkResponse {
                id: id(raw),
                data: expected
            })
        );
    }

    peer.send(Message::StreamChunk(StreamChunk {
        id: id(3),
        stream_id: stream(7),
        data: Bytes::from_static(b"late"),
    }))
    .await
    .expect("chunk sent");
    let Message::Error(ErrorMessage { id: reply_id, code, .. }) = peer.recv_message().await else {
        panic!("late chunk must be refused");
    };
    assert_eq!((reply_id, code), (id(3), ErrorCode::STREAM));
    assert_eq!(handler.streams(), vec![(stream(7), Bytes::from_static(b"abc"))]);
}

#[rstest]
#[tokio::test]
async fn streams_may_open_out_of_id_order(small_options: ConnectionOptions) {
    let handler = RecordingHandler::default();
    let (_connection, _events, mut peer) =
        spawn_with_raw_peer(handler.clone(), small_options, ProtocolVersion::CURRENT);

    let script = [
        (1, 2, &b"two"[..], Bytes::new()),
        (2, 1, &b"one"[..], Bytes::new()),
        (3, 1, &b""[..], Bytes::from("3")),
        (4, 2, &b""[..], Bytes::from("3")),
    ];
    for (raw, stream_raw, data, expected) in script {
        peer.send(Message::StreamChunk(StreamChunk {
            id: id(raw),
            stream_id: stream(stream_raw),
            data: Bytes::from_static(data),
        }))
        .await
        .expect("chunk sent");
        assert_eq!(
            peer.recv_message().await,
            Message::StreamChunkResponse(StreamChunkResponse {
                id: id(raw),
                data: expected
            }),
            "chunk {raw} on stream {stream_raw}"
        );
    }

    assert_eq!(
        handler.streams(),
        vec![
            (stream(1), Bytes::from_static(b"one")),
            (stream(2), Bytes::from_static(b"two"))
        ]
    );
}

#[rstest]
#[case::plain(StreamScopeOptions::default())]
#[case::compressed(StreamScopeOptions::default().with_compression(CompressionConfig::default()))]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_transfers_share_one_connection(
    small_options: ConnectionOptions,
    #[case] streams: StreamScopeOptions,
) {
    let handler = RecordingHandler::default();
    let pair = connected_pair((), handler.clone(), small_options.with_streams(streams));
    let client = std::sync::Arc::new(pair.client);
    let large: Bytes = (0..1_000_000u32)
        .map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8)
        .collect::<Vec<_>>()
        .into();

    let slow = tokio::spawn({
        let client = std::sync::Arc::clone(&client);
        let large = large.clone();
        async move { client.send_stream(large).await }
    });
    sleep(Duration::from_millis(5)).await;
    let fast = client.send_stream(Bytes::from_static(b"small")).await;

    assert_eq!(fast, Ok(Bytes::from("5")));
    assert_eq!(slow.await.expect("join"), Ok(Bytes::from("1000000")));
    let mut received = handler.streams();
    received.sort_by_key(|(_, payload)| payload.len());
    assert_eq!(received.len(), 2);
    assert_ne!(received[0].0, received[1].0, "each transfer has its own id");
    assert_eq!(received[0].1, Bytes::from_static(b"small"));
    assert_eq!(received[1].1, large);
    assert!(client.streams().is_empty());
    assert!(pair.server.streams().is_empty());
}

#[rstest]
#[tokio::test]
async fn per_stream_compression_needs_a_matching_receiver(small_options: ConnectionOptions) {
    let handler = RecordingHandler::default();
    let pair = connected_pair((), handler.clone(), small_options);
    let compressed =
        StreamScopeOptions::default().with_compression(CompressionConfig::default());
    let payload = Bytes::from(b"repeat ".repeat(1000));

    pair.server
        .open_stream(stream(1), compressed)
        .expect("prepared before the first chunk");
    let reply = pair
        .client
        .send_stream_with(payload.clone(), compressed)
        .await
        .expect("transfer completes");
    assert_eq!(reply, Bytes::from("7000"));

    let deflated = pair
        .client
        .send_stream_with(payload.clone(), compressed)
        .await
        .expect("transfer completes");
    assert_ne!(deflated, Bytes::from("7000"), "stream 2 arrives still deflated");
    assert_eq!(
        handler.streams().first(),
        Some(&(stream(1), payload))
    );
}

#[rstest]
#[tokio::test]
async fn cancel_abandons_the_call_and_stops_the_handler(small_options: ConnectionOptions) {
    let handler = RecordingHandler::default();
    let pair = connected_pair((), handler.clone(), small_options);
    let call = pair
        .client
        .start_call("hold", Bytes::new())
        .await
        .expect("sent");
    handler.wait_until(|h| h.calls() == ["hold"]).await;

    assert_eq!(pair.client.cancel(call.id()).await, Ok(true));
    assert_eq!(call.response().await, Err(CallError::Cancelled));

    // The handler observed the cancel and freed its worker slot.
    for _ in 0..100 {
        if pair.server.queue().outstanding() == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pair.server.queue().outstanding(), 0);
}

#[tokio::test]
async fn full_queue_answers_busy() {
    let handler = RecordingHandler::default();
    let mut pair = connected_pair((), handler.clone(), single_slot());
    let held = pair
        .client
        .start_call("hold", Bytes::new())
        .await
        .expect("sent");
    handler.wait_until(|h| h.calls() == ["hold"]).await;

    let err = pair
        .client
        .call("echo", Bytes::new())
        .await
        .expect_err("no capacity");
    assert!(err.is_busy(), "{err:?}");
    assert_eq!(
        pair.server_events.recv().await,
        Some(ConnectionEvent::WorkRejected {
            kind: rpcwire::message::MessageKind::Call
        })
    );

    handler.release();
    assert_eq!(held.response().await, Ok(Bytes::from_static(b"released")));
}

#[rstest]
#[tokio::test]
async fn heartbeats_are_answered_inline(small_options: ConnectionOptions) {
    let (_connection, _events, mut peer) = spawn_with_raw_peer((), small_options, ProtocolVersion::CURRENT);
    peer.send(Message::Heartbeat).await.expect("sent");
    let envelope = peer.recv().await.expect("open").expect("well-formed");
    assert_eq!(envelope.message, Message::HeartbeatResponse);
}

#[rstest]
#[tokio::test]
async fn malformed_message_is_reported_and_skipped(small_options: ConnectionOptions) {
    let (connection, mut events, mut peer) =
        spawn_with_raw_peer((), small_options, ProtocolVersion::CURRENT);
    peer.send_body(&[42, 2]).await;
    assert_eq!(
        events.recv().await,
        Some(ConnectionEvent::ProtocolError(ProtocolError::UnknownMessageType {
            type_id: 42,
            version: 2
        }))
    );

    peer.send(Message::Heartbeat).await.expect("sent");
    assert_eq!(
        peer.recv().await.expect("open").expect("well-formed").message,
        Message::HeartbeatResponse
    );
    assert!(!connection.is_closed());
}

#[rstest]
#[tokio::test]
async fn peer_close_fails_pending_calls(small_options: ConnectionOptions) {
    let (connection, mut events, mut peer) =
        spawn_with_raw_peer((), small_options, ProtocolVersion::CURRENT);
    let call = connection
        .start_call("slow", Bytes::new())
        .await
        .expect("sent");
    assert!(matches!(peer.recv_message().await, Message::Call(Call { method, .. }) if method == "slow"));

    peer.close().await;

    assert_eq!(call.response().await, Err(CallError::ConnectionClosed));
    assert_eq!(events.closed().await, Some(CloseReason::PeerClosed));
    connection.closed().await;
    assert_eq!(
        connection.call("echo", Bytes::new()).await,
        Err(CallError::ConnectionClosed)
    );
}

#[tokio::test(start_paused = true)]
async fn silent_peer_is_declared_dead() {
    let options = small_options().with_keepalive(
        KeepAliveOptions::default()
            .with_timeout(Duration::from_millis(200))
            .with_peer_timeout(Duration::from_millis(300)),
    );
    let (connection, mut events, mut peer) =
        spawn_with_raw_peer((), options, ProtocolVersion::CURRENT);

    let Some(ConnectionEvent::LivenessFailure(failure)) = events.recv().await else {
        panic!("expected a liveness failure");
    };
    assert!(matches!(
        events.recv().await,
        Some(ConnectionEvent::Closed(CloseReason::Liveness(reason))) if reason == failure
    ));
    assert_eq!(connection.keepalive_state(), KeepAliveState::Failed);
    assert_eq!(
        peer.recv().await.expect("open").expect("well-formed").message,
        Message::Heartbeat
    );
    peer.expect_closed().await;
}

#[tokio::test(start_paused = true)]
async fn idle_peers_keep_each_other_alive() {
    let options = small_options().with_keepalive(
        KeepAliveOptions::default()
            .with_timeout(Duration::from_millis(50))
            .with_peer_timeout(Duration::from_millis(150)),
    );
    let pair = connected_pair((), (), options);
    sleep(Duration::from_secs(2)).await;
    assert!(!pair.client.is_closed());
    assert!(!pair.server.is_closed());
    assert_eq!(pair.client.keepalive_state(), KeepAliveState::Armed);
}

#[tokio::test]
async fn drain_shutdown_still_delivers_replies() {
    let handler = RecordingHandler::default();
    let mut pair = connected_pair((), handler.clone(), single_slot());
    let held = pair
        .client
        .start_call("hold", Bytes::new())
        .await
        .expect("sent");
    handler.wait_until(|h| h.calls() == ["hold"]).await;

    let releaser = handler.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(20)).await;
        releaser.release();
    });
    pair.server.shutdown(ShutdownMode::Drain).await;

    assert_eq!(held.response().await, Ok(Bytes::from_static(b"released")));
    assert_eq!(pair.server_events.closed().await, Some(CloseReason::Local));
    assert_eq!(pair.client_events.closed().await, Some(CloseReason::PeerClosed));
}

#[tokio::test]
async fn version_one_peers_get_codeless_errors_and_no_cancel() {
    let options = small_options().with_protocol_version(ProtocolVersion::V1);
    let (connection, _events, mut peer) =
        spawn_with_raw_peer(RecordingHandler::default(), options, ProtocolVersion::V1);

    peer.send(Message::Call(Call {
        id: id(5),
        method: "fail".into(),
        payload: Bytes::new(),
    }))
    .await
    .expect("sent");
    assert_eq!(
        peer.recv_message().await,
        Message::Error(ErrorMessage {
            id: id(5),
            code: ErrorCode::GENERIC,
            message: "failed on purpose".into()
        })
    );

    let call = connection
        .start_call("slow", Bytes::new())
        .await
        .expect("sent");
    assert!(matches!(peer.recv_message().await, Message::Call(_)));
    assert_eq!(connection.cancel(call.id()).await, Ok(true));

    // Nothing was written for the cancel: the next message answers this
    // heartbeat.
    peer.send(Message::Heartbeat).await.expect("sent");
    assert_eq!(
        peer.recv().await.expect("open").expect("well-formed").message,
        Message::HeartbeatResponse
    );
}

#[rstest]
#[tokio::test]
async fn cancelling_an_unknown_call_reports_false(small_options: ConnectionOptions) {
    let pair = connected_pair((), (), small_options);
    assert_eq!(pair.client.cancel(id(12345)).await, Ok(false));
}

#[rstest]
#[tokio::test]
async fn running_connections_are_counted(small_options: ConnectionOptions) {
    let pair = connected_pair((), (), small_options);
    // Reader tasks register themselves once polled.
    pair.client.call("nope", Bytes::new()).await.expect_err("unknown method");
    assert!(rpcwire::connection::active_connection_count() >= 2);
}
