//! Name-based routing of calls and events to closures.

use std::{collections::HashMap, future::Future, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{RpcHandler, handler::unknown_method};
use crate::{
    dispatch::WorkError,
    message::{Call, Event, Payload, StreamId},
};

type MethodFn =
    Arc<dyn Fn(Bytes, CancellationToken) -> BoxFuture<'static, Result<Bytes, WorkError>> + Send + Sync>;
type EventFn = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<(), WorkError>> + Send + Sync>;
type StreamFn = Arc<dyn Fn(StreamId, Bytes) -> BoxFuture<'static, Result<Bytes, WorkError>> + Send + Sync>;

/// A name was registered twice.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// A method with this name already has a handler.
    #[error("method `{0}` is already registered")]
    DuplicateMethod(String),
    /// An event with this name already has a handler.
    #[error("event `{0}` is already registered")]
    DuplicateEvent(String),
}

/// [`RpcHandler`] dispatching on the method or event name.
///
/// Unregistered methods are answered with
/// [`ErrorCode::UNKNOWN_METHOD`](crate::message::ErrorCode::UNKNOWN_METHOD);
/// unregistered events are ignored.
///
/// ```
/// use bytes::Bytes;
/// use rpcwire::connection::MethodRouter;
///
/// let router = MethodRouter::new()
///     .method("echo", |payload: Bytes, _cancel| async move { Ok(payload) })
///     .expect("first registration")
///     .typed_method("add", |(a, b): (u32, u32), _cancel| async move { Ok(a + b) })
///     .expect("first registration");
/// assert!(router.has_method("add"));
/// ```
#[derive(Clone, Default)]
pub struct MethodRouter {
    methods: HashMap<String, MethodFn>,
    events: HashMap<String, EventFn>,
    stream: Option<StreamFn>,
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRouter")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("stream", &self.stream.is_some())
            .finish()
    }
}

impl MethodRouter {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Whether `name` has a handler.
    #[must_use]
    pub fn has_method(&self, name: &str) -> bool { self.methods.contains_key(name) }

    /// Register a handler taking and returning raw payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::DuplicateMethod`] if `name` is already taken.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Result<Self, RouteError>
    where
        F: Fn(Bytes, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, WorkError>> + Send + 'static,
    {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(RouteError::DuplicateMethod(name));
        }
        self.methods
            .insert(name, Arc::new(move |payload, cancel| handler(payload, cancel).boxed()));
        Ok(self)
    }

    /// Register a handler whose arguments and result travel as bincode
    /// [`Payload`]s. Undecodable arguments fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::DuplicateMethod`] if `name` is already taken.
    pub fn typed_method<A, R, F, Fut>(self, name: impl Into<String>, handler: F) -> Result<Self, RouteError>
    where
        A: Payload + Send + 'static,
        R: Payload + 'static,
        F: Fn(A, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, WorkError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.method(name, move |payload: Bytes, cancel| {
            let handler = Arc::clone(&handler);
            async move {
                let args = A::from_payload(&payload)
                    .map_err(|e| WorkError::new(format!("invalid arguments: {e}")))?;
                let value = handler(args, cancel).await?;
                value
                    .to_payload()
                    .map_err(|e| WorkError::new(format!("unencodable result: {e}")))
            }
        })
    }

    /// Register a handler for the event `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::DuplicateEvent`] if `name` is already taken.
    pub fn event<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Result<Self, RouteError>
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        let name = name.into();
        if self.events.contains_key(&name) {
            return Err(RouteError::DuplicateEvent(name));
        }
        self.events
            .insert(name, Arc::new(move |payload| handler(payload).boxed()));
        Ok(self)
    }

    /// Set the consumer of completed inbound streams, replacing any previous
    /// one.
    #[must_use]
    pub fn stream<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(StreamId, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, WorkError>> + Send + 'static,
    {
        self.stream = Some(Arc::new(move |stream_id, payload| handler(stream_id, payload).boxed()));
        self
    }
}

#[async_trait]
impl RpcHandler for MethodRouter {
    async fn on_call(&self, call: Call, cancel: CancellationToken) -> Result<Bytes, WorkError> {
        let Some(method) = self.methods.get(&call.method).cloned() else {
            return Err(unknown_method(&call.method));
        };
        method(call.payload, cancel).await
    }

    async fn on_event(&self, event: Event) -> Result<(), WorkError> {
        let Some(handler) = self.events.get(&event.name).cloned() else {
            debug!(event = %event.name, "no handler for event");
            return Ok(());
        };
        handler(event.payload).await
    }

    async fn on_stream(&self, stream_id: StreamId, payload: Bytes) -> Result<Bytes, WorkError> {
        match self.stream.clone() {
            Some(handler) => handler(stream_id, payload).await,
            None => Ok(Bytes::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::message::{CorrelationId, ErrorCode};

    #[fixture]
    fn router() -> MethodRouter {
        MethodRouter::new()
            .method("echo", |payload, _| async move { Ok(payload) })
            .expect("echo")
            .typed_method("add", |(a, b): (u32, u32), _| async move { Ok(a + b) })
            .expect("add")
    }

    fn call(method: &str, payload: Bytes) -> Call {
        Call {
            id: CorrelationId::new(1).expect("non-zero"),
            method: method.into(),
            payload,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn routes_by_method_name(router: MethodRouter) {
        let reply = router
            .on_call(call("echo", Bytes::from_static(b"hi")), CancellationToken::new())
            .await;
        assert_eq!(reply, Ok(Bytes::from_static(b"hi")));

        let args = (2u32, 40u32).to_payload().expect("encode");
        let sum = router
            .on_call(call("add", args), CancellationToken::new())
            .await
            .expect("add succeeds");
        assert_eq!(u32::from_payload(&sum).expect("decode"), 42);
    }

    #[rstest]
    #[tokio::test]
    async fn unknown_method_carries_its_code(router: MethodRouter) {
        let err = router
            .on_call(call("missing", Bytes::new()), CancellationToken::new())
            .await
            .expect_err("not registered");
        assert_eq!(err.code(), ErrorCode::UNKNOWN_METHOD);
    }

    #[rstest]
    #[tokio::test]
    async fn bad_typed_arguments_fail_the_call(router: MethodRouter) {
        let err = router
            .on_call(call("add", Bytes::from_static(b"\xff")), CancellationToken::new())
            .await
            .expect_err("undecodable");
        assert!(err.message().starts_with("invalid arguments"));
    }

    #[rstest]
    fn duplicate_names_are_rejected(router: MethodRouter) {
        let err = router
            .method("echo", |payload, _| async move { Ok(payload) })
            .expect_err("duplicate");
        assert_eq!(err, RouteError::DuplicateMethod("echo".into()));
    }
}
