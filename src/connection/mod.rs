//! Managed logical connection over a duplex byte transport.
//!
//! A [`Connection`] owns the two halves of a transport. In message mode one
//! background read loop decodes envelopes and classifies each one:
//!
//! 1. control messages (`config`, `ping`, `pong`) are acknowledged at once and
//!    never reach application code;
//! 2. responses to outstanding synchronous requests wake their caller;
//! 3. everything else is queued for [`Connection::read_message`] or, with
//!    auto-routing, handed to the [`Dispatcher`] on its own task.
//!
//! Any number of tasks may send concurrently; frames are serialized by a
//! single write lock. Stream mode copies raw transport bytes into a consumer
//! sink instead.

mod counter;
mod options;
mod outbound;
mod read_loop;
mod state;

use std::{net::SocketAddr, sync::Arc};

pub use counter::active_connection_count;
use counter::ActiveConnection;
use log::{error, info, warn};
pub use options::{ConnectionOptions, ConsumerSink, TransportErrorHandler, UseType};
use outbound::{Outbound, bounded};
pub use state::{ConnStatus, ConnectionState, NODE_ID_HEADER, PROJECT_ID_HEADER};
use state::StateCell;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf},
    sync::{Mutex, watch},
    time::Instant,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    correlation::SyncKeeper,
    envelope::Envelope,
    error::{ConnectionError, Result},
    fifo::InboundQueue,
    lane::{LaneReader, LaneWriter},
    mux::{Dispatcher, MessageMux},
};

/// Byte transport a [`Connection`] can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + 'static {}

struct Shared<T: Transport> {
    reader: Mutex<Option<LaneReader<ReadHalf<T>>>>,
    outbound: Arc<Outbound<WriteHalf<T>>>,
    read_deadline: watch::Sender<Option<Instant>>,
    keeper: SyncKeeper,
    fifo: InboundQueue<Envelope>,
    dispatcher: Arc<dyn Dispatcher>,
    state: StateCell,
    use_type: UseType,
    auto_route: bool,
    consumer: Mutex<Option<ConsumerSink>>,
    on_read_transport_err: Option<TransportErrorHandler>,
    shutdown: CancellationToken,
    handlers: TaskTracker,
    _active: ActiveConnection,
}

/// Per-peer connection handle.
///
/// Cloning is cheap; clones drive the same connection.
pub struct Connection<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> Connection<T> {
    /// Wrap the transport in `options`. No I/O happens until
    /// [`serve_conn`](Self::serve_conn) or a send.
    #[must_use]
    pub fn new(options: ConnectionOptions<T>) -> Self {
        let ConnectionOptions {
            transport,
            dispatcher,
            state,
            use_type,
            auto_route,
            consumer,
            on_read_transport_err,
            lane_config,
            queue_config,
            local_addr,
            remote_addr,
        } = options;
        let (read_half, write_half) = tokio::io::split(transport);
        let (read_deadline, _) = watch::channel(None);
        let dispatcher = dispatcher.unwrap_or_else(|| Arc::new(MessageMux::new()));
        let shared = Shared {
            reader: Mutex::new(Some(LaneReader::new(read_half, lane_config))),
            outbound: Arc::new(Outbound::new(
                LaneWriter::new(write_half, lane_config),
                local_addr,
                remote_addr,
            )),
            read_deadline,
            keeper: SyncKeeper::new(),
            fifo: InboundQueue::new(queue_config),
            dispatcher,
            state: StateCell::new(state),
            use_type,
            auto_route,
            consumer: Mutex::new(consumer),
            on_read_transport_err,
            shutdown: CancellationToken::new(),
            handlers: TaskTracker::new(),
            _active: ActiveConnection::new(),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Start the background task for this connection's [`UseType`].
    ///
    /// Message mode starts the envelope read loop, stream mode the raw copy
    /// loop. Share mode starts nothing. Calling this more than once only
    /// logs a warning. Must be called from within a Tokio runtime.
    pub fn serve_conn(&self) {
        match self.shared.use_type {
            UseType::Message => {
                if let Some(reader) = self.take_reader() {
                    tokio::spawn(Arc::clone(&self.shared).run_message_loop(reader));
                }
            }
            UseType::Stream => {
                if !self.shared.stream_ready() {
                    return;
                }
                if let Some(reader) = self.take_reader() {
                    tokio::spawn(Arc::clone(&self.shared).stream_loop(reader));
                }
            }
            UseType::Share => {
                error!(
                    "serve_conn: share mode is not supported, node_id={}",
                    self.shared.state.identity().node_id()
                );
            }
        }
    }

    fn take_reader(&self) -> Option<LaneReader<ReadHalf<T>>> {
        let reader = self
            .shared
            .reader
            .try_lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if reader.is_none() {
            warn!(
                "serve_conn: transport reader unavailable, node_id={}",
                self.shared.state.identity().node_id()
            );
        }
        reader
    }

    /// Send `envelope` without waiting for a response.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] after close,
    /// [`ConnectionError::Timeout`] if the write deadline passes, or the
    /// lane failure.
    pub async fn write_message_async(&self, mut envelope: Envelope) -> Result<()> {
        envelope.set_sync(false);
        self.shared.outbound.write_envelope(&envelope).await
    }

    /// Send `envelope` and wait for the correlated response.
    ///
    /// The write deadline in force when the call starts bounds both the
    /// write and the wait.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::DuplicateRequest`] if a request with the
    /// same id is outstanding, [`ConnectionError::Timeout`] if the deadline
    /// passes, [`ConnectionError::Disconnected`] if the connection fails
    /// while waiting, or the write failure.
    pub async fn write_message_sync(&self, mut envelope: Envelope) -> Result<Envelope> {
        envelope.set_sync(true);
        let shared = &self.shared;
        let deadline = shared.outbound.deadline();
        let handle = shared.keeper.register(&envelope)?;
        shared
            .outbound
            .write_envelope_until(deadline, &envelope)
            .await?;
        shared.keeper.wait_response(handle, deadline).await
    }

    /// Receive the next queued envelope.
    ///
    /// Only used when auto-routing is off; with auto-routing on nothing is
    /// ever queued.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::QueueClosed`] once the connection is
    /// closed or the read loop has terminated.
    pub async fn read_message(&self) -> Result<Envelope> {
        self.shared
            .fifo
            .get()
            .await
            .map_err(|_| ConnectionError::QueueClosed)
    }

    /// Read raw bytes from the transport, bounded by the read deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ReaderBusy`] while a read loop owns the
    /// transport reader, [`ConnectionError::Closed`] after close, or
    /// [`ConnectionError::Timeout`] if the read deadline passes.
    pub async fn read_raw(&self, buf: &mut [u8]) -> Result<usize> {
        let shared = &self.shared;
        let mut slot = shared.reader.lock().await;
        let Some(reader) = slot.as_mut() else {
            return Err(if shared.state.is_connected() {
                ConnectionError::ReaderBusy
            } else {
                ConnectionError::Closed
            });
        };
        let deadline = *shared.read_deadline.borrow();
        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => Err(ConnectionError::Closed),
            read = bounded(deadline, reader.read_raw(buf)) => read?.map_err(ConnectionError::from),
        }
    }

    /// Write raw bytes to the transport, bounded by the write deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] after close,
    /// [`ConnectionError::Timeout`] if the write deadline passes, or the
    /// transport failure.
    pub async fn write_raw(&self, buf: &[u8]) -> Result<usize> {
        self.shared.outbound.write_raw(buf).await
    }

    /// Set or clear the deadline for reads. Applies to the read in progress
    /// and every later read.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.shared.read_deadline.send_replace(deadline);
    }

    /// Set or clear the deadline for writes and synchronous waits started
    /// after this call.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.shared.outbound.set_deadline(deadline);
    }

    /// Peer address, if known. `None` once closed.
    pub async fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.outbound.lock().await.remote_addr()
    }

    /// Local address, if known. `None` once closed.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.outbound.lock().await.local_addr()
    }

    /// Close the connection. Idempotent.
    ///
    /// Blocked receivers fail with [`ConnectionError::QueueClosed`],
    /// outstanding synchronous requests with
    /// [`ConnectionError::Disconnected`], and the read loop stops without
    /// firing the transport error callback.
    ///
    /// # Errors
    ///
    /// Returns the failure to flush or shut down the write half, or
    /// [`ConnectionError::Timeout`] if the write deadline passes while
    /// flushing. The connection is closed regardless.
    pub async fn close(&self) -> Result<()> {
        let shared = &self.shared;
        shared.fifo.close();
        let shutdown = {
            let mut write = shared.outbound.lock().await;
            if shared.state.mark_disconnected() {
                info!(
                    "connection closed: node_id={}, project_id={}",
                    shared.state.identity().node_id(),
                    shared.state.identity().project_id()
                );
            }
            bounded(shared.outbound.deadline(), write.shutdown_lane()).await
        };
        shared.shutdown.cancel();
        shared.keeper.cancel_all();
        shared.handlers.close();
        if let Ok(mut reader) = shared.reader.try_lock() {
            *reader = None;
        }
        shutdown?.map_err(ConnectionError::from)
    }

    /// Snapshot of status, headers and peer certificates.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState { self.shared.state.snapshot() }

    /// Watch the connection status.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnStatus> { self.shared.state.subscribe() }

    /// Number of synchronous requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize { self.shared.keeper.pending_count() }

    /// Wait for every dispatched handler to finish.
    ///
    /// Completes only after [`close`](Self::close) has been called.
    pub async fn wait_handlers(&self) { self.shared.handlers.wait().await; }
}
