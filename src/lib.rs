#![doc(html_root_url = "https://docs.rs/rpcwire/latest")]
//! Processing core of a peer-to-peer RPC transport.
//!
//! One ordered byte stream carries request/response calls, fire-and-forget
//! events and chunked stream transfers between two equal peers:
//!
//! - [`message`] defines the typed, versioned wire format and its frame
//!   codec.
//! - [`stream`] splits large payloads into bounded chunks with optional
//!   compression and reassembles them.
//! - [`dispatch`] runs inbound work on a bounded, multi-worker priority
//!   queue.
//! - [`keepalive`] detects dead peers with heartbeats.
//! - [`connection`] wires the four together over any `AsyncRead +
//!   AsyncWrite` transport.

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod keepalive;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod stream;

pub use connection::{
    CallError,
    Connection,
    ConnectionEvent,
    ConnectionEvents,
    ConnectionOptions,
    MethodRouter,
    RpcHandler,
};
pub use dispatch::{PriorityDispatchQueue, ShutdownMode, WorkError, WorkHandle, WorkOutcome};
pub use error::{Result, RpcwireError};
pub use keepalive::{KeepAliveMonitor, KeepAliveOptions};
pub use message::{CorrelationId, ErrorCode, Message, MessageCodec, Payload, ProtocolVersion, StreamId};
pub use metrics::Direction;
pub use stream::{StreamRegistry, StreamScope, StreamScopeOptions};
