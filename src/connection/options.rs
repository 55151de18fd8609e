//! Construction options for a [`Connection`](super::Connection).

use std::{io, net::SocketAddr, sync::Arc};

use tokio::{io::AsyncWrite, net::TcpStream};

use super::state::ConnectionState;
use crate::{fifo::QueueConfig, lane::LaneConfig, mux::Dispatcher};

/// Callback invoked with `(node_id, project_id)` when the read loop fails.
pub type TransportErrorHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Destination for raw bytes in [`UseType::Stream`] mode.
pub type ConsumerSink = Box<dyn AsyncWrite + Send + Unpin>;

/// How a connection consumes its transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UseType {
    /// Framed envelopes handled by the message read loop.
    #[default]
    Message,
    /// Raw bytes copied into a consumer sink.
    Stream,
    /// Transport shared with another owner; no read loop is started.
    Share,
}

/// Builder-style options consumed by [`Connection::new`](super::Connection::new).
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use wirelane::{
///     connection::{ConnectionOptions, ConnectionState, NODE_ID_HEADER, UseType},
///     mux::MessageMux,
/// };
///
/// let (transport, _peer) = tokio::io::duplex(1024);
/// let options = ConnectionOptions::new(transport)
///     .use_type(UseType::Message)
///     .auto_route(true)
///     .dispatcher(Arc::new(MessageMux::new()))
///     .state(ConnectionState::new().with_header(NODE_ID_HEADER, "edge-1"));
/// # drop(options);
/// ```
pub struct ConnectionOptions<T> {
    pub(super) transport: T,
    pub(super) dispatcher: Option<Arc<dyn Dispatcher>>,
    pub(super) state: ConnectionState,
    pub(super) use_type: UseType,
    pub(super) auto_route: bool,
    pub(super) consumer: Option<ConsumerSink>,
    pub(super) on_read_transport_err: Option<TransportErrorHandler>,
    pub(super) lane_config: LaneConfig,
    pub(super) queue_config: QueueConfig,
    pub(super) local_addr: Option<SocketAddr>,
    pub(super) remote_addr: Option<SocketAddr>,
}

impl<T> ConnectionOptions<T> {
    /// Options for `transport` with message mode, auto-routing off and an
    /// unbounded inbound queue.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            dispatcher: None,
            state: ConnectionState::default(),
            use_type: UseType::default(),
            auto_route: false,
            consumer: None,
            on_read_transport_err: None,
            lane_config: LaneConfig::default(),
            queue_config: QueueConfig::default(),
            local_addr: None,
            remote_addr: None,
        }
    }

    /// Dispatcher receiving routed envelopes. Defaults to an empty
    /// [`MessageMux`](crate::mux::MessageMux).
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Initial state carrying the peer headers and certificates.
    #[must_use]
    pub fn state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn use_type(mut self, use_type: UseType) -> Self {
        self.use_type = use_type;
        self
    }

    /// Dispatch inbound envelopes instead of queueing them for
    /// [`read_message`](super::Connection::read_message).
    #[must_use]
    pub fn auto_route(mut self, auto_route: bool) -> Self {
        self.auto_route = auto_route;
        self
    }

    /// Sink receiving raw bytes in [`UseType::Stream`] mode.
    #[must_use]
    pub fn consumer(mut self, consumer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }

    /// Callback fired once when the message read loop fails.
    #[must_use]
    pub fn on_read_transport_err(
        mut self,
        handler: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_read_transport_err = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn lane_config(mut self, config: LaneConfig) -> Self {
        self.lane_config = config;
        self
    }

    #[must_use]
    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    /// Addresses reported by `local_addr` and `remote_addr`.
    #[must_use]
    pub fn addresses(mut self, local: SocketAddr, remote: SocketAddr) -> Self {
        self.local_addr = Some(local);
        self.remote_addr = Some(remote);
        self
    }
}

impl ConnectionOptions<TcpStream> {
    /// Options for a TCP stream, recording its local and peer addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if either address cannot be read from the socket.
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        Ok(Self::new(stream).addresses(local, remote))
    }
}
