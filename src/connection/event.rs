//! Notifications published by a running connection.

use derive_more::Display;
use tokio::sync::mpsc;

use crate::{
    keepalive::LivenessError,
    message::{MessageKind, ProtocolError},
};

/// Why a connection stopped.
#[derive(Clone, Debug, PartialEq, Eq, Display)]
pub enum CloseReason {
    /// [`Connection::shutdown`](super::Connection::shutdown) was called.
    #[display("local shutdown")]
    Local,
    /// The [`Connection`](super::Connection) handle was dropped.
    #[display("handle dropped")]
    Dropped,
    /// The peer closed its end of the stream.
    #[display("peer closed the stream")]
    PeerClosed,
    /// The byte stream broke or lost frame sync.
    #[display("transport failure: {_0}")]
    Transport(String),
    /// The peer stopped sending traffic.
    #[display("{_0}")]
    Liveness(LivenessError),
}

/// Something the owner of a connection may want to react to.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A message body could not be decoded. The connection carries on.
    ProtocolError(ProtocolError),
    /// A handler for routed work failed or panicked.
    WorkFailed {
        /// Kind of the message the work served.
        kind: MessageKind,
        /// Description of the failure.
        error: String,
    },
    /// Inbound work was dropped because the dispatch queue was full.
    WorkRejected {
        /// Kind of the dropped message.
        kind: MessageKind,
    },
    /// The peer was declared dead. A [`ConnectionEvent::Closed`] follows.
    LivenessFailure(LivenessError),
    /// The connection has stopped. Always the last event.
    Closed(CloseReason),
}

/// Receiving side of a connection's event feed.
#[derive(Debug)]
pub struct ConnectionEvents {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionEvents {
    pub(super) fn channel() -> (mpsc::UnboundedSender<ConnectionEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next event; `None` once the connection has gone and
    /// every event was consumed.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> { self.rx.recv().await }

    /// Take an event if one is ready.
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> { self.rx.try_recv().ok() }

    /// Wait for the [`ConnectionEvent::Closed`] event, discarding others.
    pub async fn closed(&mut self) -> Option<CloseReason> {
        while let Some(event) = self.rx.recv().await {
            if let ConnectionEvent::Closed(reason) = event {
                return Some(reason);
            }
        }
        None
    }
}
