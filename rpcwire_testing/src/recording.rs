//! Handler that records what it receives.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use rpcwire::{
    ErrorCode,
    RpcHandler,
    StreamId,
    WorkError,
    message::{Call, Event},
};
use tokio::{sync::Notify, time::timeout};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Log {
    calls: Vec<String>,
    events: Vec<(String, Bytes)>,
    streams: Vec<(StreamId, Bytes)>,
}

/// [`RpcHandler`] with a few canned methods that logs everything it sees.
///
/// | method  | behaviour                                          |
/// |---------|----------------------------------------------------|
/// | `echo`  | replies with the call payload                      |
/// | `fail`  | fails with code 42 and message `"failed on purpose"` |
/// | `panic` | panics                                             |
/// | `hold`  | waits until [`RecordingHandler::release`] or cancel |
///
/// Any other method is unknown. A completed stream is answered with its
/// length as a decimal string.
#[derive(Clone, Debug, Default)]
pub struct RecordingHandler {
    log: Arc<Mutex<Log>>,
    changed: Arc<Notify>,
    gate: Arc<Notify>,
}

impl RecordingHandler {
    /// Methods called so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> { self.log.lock().expect("log lock").calls.clone() }

    /// Events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Bytes)> { self.log.lock().expect("log lock").events.clone() }

    /// Completed streams received so far.
    #[must_use]
    pub fn streams(&self) -> Vec<(StreamId, Bytes)> { self.log.lock().expect("log lock").streams.clone() }

    /// Let one `hold` call finish.
    pub fn release(&self) { self.gate.notify_one(); }

    /// Wait until `check` holds for the recorded state.
    ///
    /// # Panics
    ///
    /// Panics if it does not hold within five seconds.
    pub async fn wait_until(&self, check: impl Fn(&Self) -> bool) {
        timeout(Duration::from_secs(5), async {
            loop {
                let changed = self.changed.notified();
                if check(self) {
                    return;
                }
                changed.await;
            }
        })
        .await
        .expect("condition reached in time");
    }

    fn record(&self, update: impl FnOnce(&mut Log)) {
        update(&mut self.log.lock().expect("log lock"));
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl RpcHandler for RecordingHandler {
    async fn on_call(&self, call: Call, cancel: CancellationToken) -> Result<Bytes, WorkError> {
        self.record(|log| log.calls.push(call.method.clone()));
        match call.method.as_str() {
            "echo" => Ok(call.payload),
            "fail" => Err(WorkError::with_code(ErrorCode(42), "failed on purpose")),
            "panic" => panic!("handler exploded"),
            "hold" => {
                tokio::select! {
                    () = self.gate.notified() => Ok(Bytes::from_static(b"released")),
                    () = cancel.cancelled() => Err(WorkError::with_code(ErrorCode::CANCELLED, "stopped")),
                }
            }
            other => Err(WorkError::with_code(
                ErrorCode::UNKNOWN_METHOD,
                format!("unknown method `{other}`"),
            )),
        }
    }

    async fn on_event(&self, event: Event) -> Result<(), WorkError> {
        let failing = event.name == "fail";
        self.record(|log| log.events.push((event.name, event.payload)));
        if failing {
            return Err(WorkError::new("event failed on purpose"));
        }
        Ok(())
    }

    async fn on_stream(&self, stream_id: StreamId, payload: Bytes) -> Result<Bytes, WorkError> {
        let len = payload.len();
        self.record(|log| log.streams.push((stream_id, payload)));
        Ok(Bytes::from(len.to_string()))
    }
}
