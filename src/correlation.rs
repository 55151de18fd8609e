//! Correlation of synchronous requests with their responses.
//!
//! [`SyncKeeper`] records every outstanding synchronous request by id. The
//! read loop offers each inbound envelope to
//! [`SyncKeeper::match_and_notify`]; an envelope whose `parent_id` names a
//! pending request is handed to the waiting caller instead of flowing on to
//! the inbound queue or the dispatcher.
//!
//! Registrations are owned by a [`WaitHandle`]. Dropping the handle (after a
//! response, a timeout or a cancelled caller) removes the entry, so late
//! responses for abandoned requests fall through to normal routing.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{sync::oneshot, time::Instant};

use crate::{envelope::Envelope, error::ConnectionError};

type PendingMap = DashMap<String, oneshot::Sender<Envelope>>;

/// Table of synchronous requests awaiting a response.
///
/// Cloning is cheap; clones share the same table.
#[derive(Clone, Default)]
pub struct SyncKeeper {
    pending: Arc<PendingMap>,
}

/// Registration of one outstanding synchronous request.
///
/// Pass it to [`SyncKeeper::wait_response`] to receive the response.
pub struct WaitHandle {
    id: String,
    rx: oneshot::Receiver<Envelope>,
    pending: Arc<PendingMap>,
}

impl WaitHandle {
    /// Identifier of the request this handle waits on.
    #[must_use]
    pub fn id(&self) -> &str { &self.id }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.rx.close();
        // A re-registration of the same id installs a live sender; keep it.
        self.pending.remove_if(&self.id, |_, tx| tx.is_closed());
    }
}

impl SyncKeeper {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `request` as awaiting a response.
    ///
    /// Must be called before the request is written so that a fast response
    /// cannot overtake the registration.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::DuplicateRequest`] if a request with the
    /// same id is still waiting.
    pub fn register(&self, request: &Envelope) -> Result<WaitHandle, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(request.id().to_owned()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return Err(ConnectionError::DuplicateRequest(entry.key().clone()));
                }
                entry.insert(tx);
            }
            Entry::Vacant(entry) => {
                entry.insert(tx);
            }
        }
        Ok(WaitHandle {
            id: request.id().to_owned(),
            rx,
            pending: Arc::clone(&self.pending),
        })
    }

    /// Deliver `envelope` to the request named by its `parent_id`.
    ///
    /// # Errors
    ///
    /// Hands the envelope back when no live waiter matches it, so the caller
    /// can route it elsewhere.
    pub fn match_and_notify(&self, envelope: Envelope) -> Result<(), Envelope> {
        let waiter = envelope
            .parent_id()
            .and_then(|parent| self.pending.remove(parent));
        match waiter {
            Some((_, tx)) => tx.send(envelope),
            None => Err(envelope),
        }
    }

    /// Wait for the response to a registered request.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Timeout`] if `deadline` passes first and
    /// [`ConnectionError::Disconnected`] if the registration is cancelled by
    /// connection teardown.
    pub async fn wait_response(
        &self,
        mut handle: WaitHandle,
        deadline: Option<Instant>,
    ) -> Result<Envelope, ConnectionError> {
        let received = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut handle.rx)
                .await
                .map_err(|_| ConnectionError::Timeout)?,
            None => (&mut handle.rx).await,
        };
        received.map_err(|_| ConnectionError::Disconnected)
    }

    /// Fail every outstanding wait with [`ConnectionError::Disconnected`].
    pub fn cancel_all(&self) { self.pending.clear(); }

    /// Returns true if a request with `id` is awaiting a response.
    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool { self.pending.contains_key(id) }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize { self.pending.len() }
}
