//! Closeable FIFO of inbound envelopes for pull-style consumers.
//!
//! When auto-routing is disabled the read loop [`put`](InboundQueue::put)s
//! every non-control, uncorrelated envelope here and callers drain it with
//! [`get`](InboundQueue::get). Closing the queue wakes every blocked
//! consumer with [`QueueError::Closed`]. Sealing it stops producers only;
//! consumers drain what is buffered before seeing [`QueueError::Closed`].
//!
//! The queue is unbounded unless configured with [`QueueConfig::bounded`],
//! in which case an [`OverflowPolicy`] decides what a full queue does.

use std::sync::{
    Mutex as StdMutex,
    PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use log::warn;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Behaviour when a bounded queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for space, which stalls the read loop until a consumer drains.
    Block,
    /// Return [`QueueError::Full`] to the producer.
    ReturnErrorIfFull,
    /// Silently drop the new item.
    DropIfFull,
    /// Drop the new item but emit a log warning.
    WarnAndDropIfFull,
}

/// Errors raised by queue operations.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has been closed.
    #[error("inbound queue closed")]
    Closed,
    /// The queue was at capacity and the policy was `ReturnErrorIfFull`.
    #[error("inbound queue full")]
    Full,
}

/// Errors returned when building a [`QueueConfig`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueConfigError {
    /// Bounded queues need room for at least one item.
    #[error("invalid capacity {0}; must be >= 1")]
    InvalidCapacity(usize),
}

/// Capacity and overflow behaviour of an [`InboundQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    capacity: Option<usize>,
    policy: OverflowPolicy,
}

impl QueueConfig {
    /// A queue that never rejects items.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            capacity: None,
            policy: OverflowPolicy::Block,
        }
    }

    /// A queue holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// Returns [`QueueConfigError::InvalidCapacity`] if `capacity` is zero.
    pub fn bounded(capacity: usize, policy: OverflowPolicy) -> Result<Self, QueueConfigError> {
        if capacity == 0 {
            return Err(QueueConfigError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity: Some(capacity),
            policy,
        })
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> { self.capacity }

    #[must_use]
    pub const fn policy(&self) -> OverflowPolicy { self.policy }
}

impl Default for QueueConfig {
    fn default() -> Self { Self::unbounded() }
}

enum QueueSender<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    Bounded(mpsc::Sender<T>),
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Unbounded(tx) => Self::Unbounded(tx.clone()),
            Self::Bounded(tx) => Self::Bounded(tx.clone()),
        }
    }
}

enum QueueReceiver<T> {
    Unbounded(mpsc::UnboundedReceiver<T>),
    Bounded(mpsc::Receiver<T>),
}

impl<T> QueueReceiver<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            Self::Unbounded(rx) => rx.recv().await,
            Self::Bounded(rx) => rx.recv().await,
        }
    }
}

/// Multi-producer, multi-consumer FIFO with close semantics.
pub struct InboundQueue<T> {
    /// `None` once sealed.
    tx: StdMutex<Option<QueueSender<T>>>,
    rx: Mutex<QueueReceiver<T>>,
    policy: OverflowPolicy,
    len: AtomicUsize,
    closed: CancellationToken,
    sealed: CancellationToken,
}

impl<T> InboundQueue<T> {
    /// Create an open queue.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        let (tx, rx) = match config.capacity {
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
            }
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
            }
        };
        Self {
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            policy: config.policy,
            len: AtomicUsize::new(0),
            closed: CancellationToken::new(),
            sealed: CancellationToken::new(),
        }
    }

    /// Append `item` to the tail of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] once the queue is closed or sealed
    /// and [`QueueError::Full`] when a bounded queue with
    /// [`OverflowPolicy::ReturnErrorIfFull`] has no room.
    pub async fn put(&self, item: T) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }
        let Some(tx) = self.sender() else {
            return Err(QueueError::Closed);
        };
        // Counted before the send so a racing `get` never sees more items
        // than the counter.
        self.len.fetch_add(1, Ordering::AcqRel);
        let enqueued = match &tx {
            QueueSender::Unbounded(tx) => tx.send(item).map(|()| true).map_err(|_| QueueError::Closed),
            QueueSender::Bounded(tx) => self.put_bounded(tx, item).await,
        };
        if !matches!(enqueued, Ok(true)) {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        enqueued.map(|_| ())
    }

    async fn put_bounded(&self, tx: &mpsc::Sender<T>, item: T) -> Result<bool, QueueError> {
        let item = match tx.try_send(item) {
            Ok(()) => return Ok(true),
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(QueueError::Closed),
            Err(mpsc::error::TrySendError::Full(item)) => item,
        };
        match self.policy {
            OverflowPolicy::Block => tokio::select! {
                biased;
                () = self.closed.cancelled() => Err(QueueError::Closed),
                () = self.sealed.cancelled() => Err(QueueError::Closed),
                sent = tx.send(item) => sent.map(|()| true).map_err(|_| QueueError::Closed),
            },
            OverflowPolicy::ReturnErrorIfFull => Err(QueueError::Full),
            OverflowPolicy::DropIfFull => Ok(false),
            OverflowPolicy::WarnAndDropIfFull => {
                warn!(
                    "inbound queue full: dropping item, capacity={}",
                    tx.max_capacity()
                );
                Ok(false)
            }
        }
    }

    /// Remove and return the head of the queue, waiting until one arrives.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] once the queue is closed, including
    /// for consumers already blocked here. Items still buffered at close
    /// are discarded. A sealed queue hands out its buffered items first.
    pub async fn get(&self) -> Result<T, QueueError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(QueueError::Closed),
            item = self.recv() => item.ok_or(QueueError::Closed),
        }
    }

    async fn recv(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        let item = rx.recv().await;
        if item.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    fn sender(&self) -> Option<QueueSender<T>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Close the queue, discarding buffered items. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
        self.seal();
    }

    /// Refuse further items but keep buffered ones available to
    /// [`get`](Self::get). Idempotent.
    pub fn seal(&self) {
        self.sealed.cancel();
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Whether the queue has been closed or sealed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.is_cancelled() || self.sealed.is_cancelled() }

    /// Number of items currently buffered.
    #[must_use]
    pub fn len(&self) -> usize { self.len.load(Ordering::Acquire) }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<T> Default for InboundQueue<T> {
    fn default() -> Self { Self::new(QueueConfig::default()) }
}
