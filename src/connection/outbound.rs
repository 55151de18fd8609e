//! Serialized write access to the transport.
//!
//! Every outbound operation (routed responses, control acks, caller sends
//! and raw writes) goes through one async lock so frames never interleave on
//! the wire. The write deadline bounds the whole operation, including the
//! wait for the lock.

use std::{future::Future, net::SocketAddr};

use async_trait::async_trait;
use tokio::{
    io::AsyncWrite,
    sync::{Mutex, MutexGuard, watch},
    time::Instant,
};

use crate::{
    envelope::Envelope,
    error::ConnectionError,
    lane::{LaneError, LaneWriter},
    mux::EnvelopeSink,
};

/// Run `fut` to completion or until `deadline` passes.
pub(super) async fn bounded<F: Future>(
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, ConnectionError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| ConnectionError::Timeout),
        None => Ok(fut.await),
    }
}

/// State guarded by the write lock.
pub(super) struct WriteState<W> {
    lane: Option<LaneWriter<W>>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl<W> WriteState<W>
where
    W: AsyncWrite + Unpin,
{
    /// Flush and shut down the writer. Later writes fail with
    /// [`ConnectionError::Closed`].
    pub(super) async fn shutdown_lane(&mut self) -> Result<(), LaneError> {
        match self.lane.take() {
            Some(mut lane) => lane.shutdown().await,
            None => Ok(()),
        }
    }

    fn lane(&mut self) -> Result<&mut LaneWriter<W>, ConnectionError> {
        self.lane.as_mut().ok_or(ConnectionError::Closed)
    }

    pub(super) fn local_addr(&self) -> Option<SocketAddr> { self.lane.as_ref().and(self.local_addr) }

    pub(super) fn remote_addr(&self) -> Option<SocketAddr> {
        self.lane.as_ref().and(self.remote_addr)
    }
}

/// Write half of a connection.
pub(super) struct Outbound<W> {
    state: Mutex<WriteState<W>>,
    deadline: watch::Sender<Option<Instant>>,
}

impl<W> Outbound<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub(super) fn new(
        lane: LaneWriter<W>,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let (deadline, _) = watch::channel(None);
        Self {
            state: Mutex::new(WriteState {
                lane: Some(lane),
                local_addr,
                remote_addr,
            }),
            deadline,
        }
    }

    pub(super) async fn lock(&self) -> MutexGuard<'_, WriteState<W>> { self.state.lock().await }

    /// Current write deadline.
    pub(super) fn deadline(&self) -> Option<Instant> { *self.deadline.borrow() }

    pub(super) fn set_deadline(&self, deadline: Option<Instant>) {
        self.deadline.send_replace(deadline);
    }

    /// Write one envelope, bounded by the current write deadline.
    pub(super) async fn write_envelope(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        self.write_envelope_until(self.deadline(), envelope).await
    }

    /// Write one envelope, bounded by `deadline`.
    pub(super) async fn write_envelope_until(
        &self,
        deadline: Option<Instant>,
        envelope: &Envelope,
    ) -> Result<(), ConnectionError> {
        bounded(deadline, async {
            let mut state = self.state.lock().await;
            state.lane()?.write_envelope(envelope).await?;
            Ok::<_, ConnectionError>(())
        })
        .await?
    }

    /// Write raw bytes, bounded by the current write deadline.
    pub(super) async fn write_raw(&self, buf: &[u8]) -> Result<usize, ConnectionError> {
        bounded(self.deadline(), async {
            let mut state = self.state.lock().await;
            Ok::<_, ConnectionError>(state.lane()?.write_raw(buf).await?)
        })
        .await?
    }
}

#[async_trait]
impl<W> EnvelopeSink for Outbound<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send_envelope(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        self.write_envelope(envelope).await
    }
}
