//! Fixtures for exercising `rpcwire` connections in memory.
//!
//! Connections run over `tokio::io::duplex` streams. Either both ends are
//! real [`Connection`](rpcwire::Connection)s ([`connected_pair`]) or one end
//! is a [`RawPeer`] that reads and writes individual messages, for tests that
//! need to script the wire exchange.
//!
//! ```rust
//! use bytes::Bytes;
//! use rpcwire_testing::{RecordingHandler, connected_pair, small_options};
//!
//! # async fn demo() {
//! let pair = connected_pair((), RecordingHandler::default(), small_options());
//! let reply = pair.client.call("echo", Bytes::from_static(b"hi")).await;
//! assert_eq!(reply.as_deref(), Ok(&b"hi"[..]));
//! # }
//! ```

mod pair;
mod raw;
mod recording;

pub use pair::{ConnectedPair, connected_pair, queue_options, small_options};
pub use raw::{RawPeer, spawn_with_raw_peer};
pub use recording::RecordingHandler;

/// Capacity of the in-memory streams created by these helpers.
pub const DUPLEX_CAPACITY: usize = 64 * 1024;
