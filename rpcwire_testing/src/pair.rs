//! Two connections joined back to back.

use rpcwire::{
    Connection,
    ConnectionEvents,
    ConnectionOptions,
    RpcHandler,
    dispatch::ParallelQueueOptions,
};
use rstest::fixture;
use tokio::io::duplex;

use crate::DUPLEX_CAPACITY;

/// Both ends of an in-memory connection.
#[derive(Debug)]
pub struct ConnectedPair {
    pub client: Connection,
    pub client_events: ConnectionEvents,
    pub server: Connection,
    pub server_events: ConnectionEvents,
}

/// Queue sizing used by [`small_options`]: ten slots, two workers.
#[fixture]
pub fn queue_options() -> ParallelQueueOptions {
    ParallelQueueOptions::new(10, 2).expect("valid queue options")
}

/// Connection options with a small dispatch queue and keep-alive disabled.
#[fixture]
pub fn small_options() -> ConnectionOptions { ConnectionOptions::new(queue_options()) }

/// Start `client` and `server` handlers on the two halves of a duplex stream.
///
/// # Panics
///
/// Panics if `options` are invalid or no tokio runtime is running.
pub fn connected_pair<C, S>(client: C, server: S, options: ConnectionOptions) -> ConnectedPair
where
    C: RpcHandler,
    S: RpcHandler,
{
    let (left, right) = duplex(DUPLEX_CAPACITY);
    let (client, client_events) = Connection::spawn(left, client, options).expect("client starts");
    let (server, server_events) = Connection::spawn(right, server, options).expect("server starts");
    ConnectedPair {
        client,
        client_events,
        server,
        server_events,
    }
}
