//! Dispatch of routed envelopes to application handlers.
//!
//! A [`Dispatcher`] receives every inbound envelope that is neither a control
//! message nor a correlated response, together with a [`ResponseWriter`]
//! bound to the originating connection. [`MessageMux`] is the stock
//! dispatcher: a route table keyed by [`Operation`] with an optional
//! fallback handler.

use std::{collections::HashMap, future::Future, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::warn;
use thiserror::Error;

use crate::{
    envelope::{Envelope, Operation, ResponseKind},
    error::ConnectionError,
};

/// Inbound envelope plus the peer identity it arrived with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRequest {
    /// Snapshot of the connection headers (`node_id`, `project_id`, ...).
    pub headers: HashMap<String, String>,
    /// DER-encoded certificates presented by the peer.
    pub peer_certificates: Vec<Vec<u8>>,
    /// The envelope being dispatched.
    pub message: Envelope,
}

/// Destination for envelopes written by a [`ResponseWriter`].
#[async_trait]
pub trait EnvelopeSink: Send + Sync {
    /// Write one envelope to the peer.
    async fn send_envelope(&self, envelope: &Envelope) -> Result<(), ConnectionError>;
}

/// Handle for answering a dispatched request on its connection.
#[derive(Clone)]
pub struct ResponseWriter {
    sink: Arc<dyn EnvelopeSink>,
}

impl ResponseWriter {
    #[must_use]
    pub fn new(sink: Arc<dyn EnvelopeSink>) -> Self { Self { sink } }

    /// Write `response` to the peer.
    ///
    /// # Errors
    ///
    /// Propagates the connection's write failure.
    pub async fn write_response(&self, response: &Envelope) -> Result<(), ConnectionError> {
        self.sink.send_envelope(response).await
    }

    /// Answer `request` with an error response carrying `reason`.
    ///
    /// # Errors
    ///
    /// Propagates the connection's write failure.
    pub async fn write_error(&self, request: &Envelope, reason: &str) -> Result<(), ConnectionError> {
        let response = request.respond_to(ResponseKind::Error(reason.to_owned()));
        self.sink.send_envelope(&response).await
    }
}

/// Receives routed envelopes from a connection's read loop.
///
/// Each call runs on its own task, so implementations may await
/// synchronous requests on the same connection.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn serve_conn(&self, request: MessageRequest, writer: ResponseWriter);
}

/// Boxed asynchronous route handler.
pub type Handler =
    Arc<dyn Fn(MessageRequest, ResponseWriter) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(MessageRequest, ResponseWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |request, writer| Box::pin(f(request, writer)))
}

/// Errors raised while building a [`MessageMux`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MuxError {
    /// A handler is already registered for this operation.
    #[error("route already registered for operation {0}")]
    DuplicateRoute(Operation),
}

/// Route table dispatching on an envelope's [`Operation`].
///
/// Synchronous requests with no matching route are answered with an error
/// response so the caller does not wait for its deadline.
#[derive(Clone, Default)]
pub struct MessageMux {
    routes: HashMap<Operation, Handler>,
    fallback: Option<Handler>,
}

impl MessageMux {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `handler` for `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::DuplicateRoute`] if `operation` already has a
    /// handler.
    pub fn route(mut self, operation: Operation, handler: Handler) -> Result<Self, MuxError> {
        if self.routes.contains_key(&operation) {
            return Err(MuxError::DuplicateRoute(operation));
        }
        self.routes.insert(operation, handler);
        Ok(self)
    }

    /// Handler for operations without a dedicated route.
    #[must_use]
    pub fn fallback(mut self, handler: Handler) -> Self {
        self.fallback = Some(handler);
        self
    }

    #[must_use]
    pub fn has_route(&self, operation: &Operation) -> bool { self.routes.contains_key(operation) }
}

#[async_trait]
impl Dispatcher for MessageMux {
    async fn serve_conn(&self, request: MessageRequest, writer: ResponseWriter) {
        let route = self
            .routes
            .get(request.message.operation())
            .or(self.fallback.as_ref())
            .cloned();
        if let Some(route) = route {
            route(request, writer).await;
            return;
        }

        let message = &request.message;
        warn!(
            "no route for message: operation={}, id={}, resource={}",
            message.operation(),
            message.id(),
            message.resource()
        );
        if !message.is_sync() {
            return;
        }
        if let Err(e) = writer.write_error(message, "no route for operation").await {
            warn!("failed to reject unrouted request: id={}, error={e}", message.id());
        }
    }
}
