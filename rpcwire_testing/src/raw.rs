//! A scripted peer speaking individual messages.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rpcwire::{
    Connection,
    ConnectionEvents,
    ConnectionOptions,
    Message,
    MessageCodec,
    ProtocolVersion,
    RpcHandler,
    message::{CodecError, Envelope, ProtocolError},
};
use tokio::{
    io::{AsyncWriteExt, DuplexStream, WriteHalf, duplex, split},
    time::timeout,
};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::DUPLEX_CAPACITY;

/// Longest wait in [`RawPeer::recv`] before giving up.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// The far end of a connection, driven message by message.
#[derive(Debug)]
pub struct RawPeer {
    reader: FramedRead<tokio::io::ReadHalf<DuplexStream>, MessageCodec>,
    writer: FramedWrite<WriteHalf<DuplexStream>, MessageCodec>,
}

/// Start a connection whose peer is a [`RawPeer`] writing `peer_version`.
///
/// # Panics
///
/// Panics if `options` are invalid or no tokio runtime is running.
pub fn spawn_with_raw_peer<H: RpcHandler>(
    handler: H,
    options: ConnectionOptions,
    peer_version: ProtocolVersion,
) -> (Connection, ConnectionEvents, RawPeer) {
    let (local, remote) = duplex(DUPLEX_CAPACITY);
    let (connection, events) = Connection::spawn(local, handler, options).expect("connection starts");
    let codec = MessageCodec::new(peer_version).with_max_frame_length(options.max_frame_length);
    let (read_half, write_half) = split(remote);
    let peer = RawPeer {
        reader: FramedRead::new(read_half, codec),
        writer: FramedWrite::new(write_half, codec),
    };
    (connection, events, peer)
}

impl RawPeer {
    /// Write one message.
    ///
    /// # Errors
    ///
    /// Returns the codec error if the message cannot be written.
    pub async fn send(&mut self, message: Message) -> Result<(), CodecError> { self.writer.send(message).await }

    /// Write a pre-encoded frame body behind a correct length prefix.
    ///
    /// # Panics
    ///
    /// Panics if the stream is closed.
    pub async fn send_body(&mut self, body: &[u8]) {
        let len = u32::try_from(body.len()).expect("body fits a frame");
        let mut frame = Vec::with_capacity(body.len() + 4);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(body);
        self.send_raw(&frame).await;
    }

    /// Write bytes straight to the stream, bypassing the codec.
    ///
    /// # Panics
    ///
    /// Panics if the stream is closed.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let io = self.writer.get_mut();
        io.write_all(bytes).await.expect("raw write");
        io.flush().await.expect("raw flush");
    }

    /// Next decoded item, malformed bodies included.
    ///
    /// # Panics
    ///
    /// Panics after five seconds without a message or on a fatal codec
    /// error. Returns `None` when the connection closed the stream.
    pub async fn recv(&mut self) -> Option<Result<Envelope, ProtocolError>> {
        let item = timeout(RECV_TIMEOUT, self.reader.next())
            .await
            .expect("message within timeout")?;
        Some(item.expect("stream in sync"))
    }

    /// Next well-formed message that is not a heartbeat.
    ///
    /// # Panics
    ///
    /// As [`RawPeer::recv`], and if the stream ends first.
    pub async fn recv_message(&mut self) -> Message {
        loop {
            let envelope = self
                .recv()
                .await
                .expect("connection still open")
                .expect("well-formed message");
            if !matches!(envelope.message, Message::Heartbeat | Message::HeartbeatResponse) {
                return envelope.message;
            }
        }
    }

    /// Wait until the connection closes its end of the stream.
    ///
    /// # Panics
    ///
    /// Panics if the stream stays open past the timeout.
    pub async fn expect_closed(&mut self) {
        while self.recv().await.is_some() {}
    }

    /// Close the peer's write half, as a peer shutting down would.
    pub async fn close(&mut self) { let _ = self.writer.get_mut().shutdown().await; }
}
