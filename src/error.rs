//! Canonical error and result types for the crate.
//!
//! [`ConnectionError`] is the single surface returned by the public
//! [`crate::connection::Connection`] API. Lane-level failures keep their
//! structured form inside [`ConnectionError::Lane`] so callers can still
//! tell an orderly peer close apart from a broken transport.

use std::io;

use thiserror::Error;

use crate::lane::LaneError;

/// Top-level error type exposed by `wirelane`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// An error in the underlying transport.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The lane failed to frame, encode or decode an envelope.
    #[error("lane error: {0}")]
    Lane(#[from] LaneError),
    /// The connection has been closed locally or torn down by the read loop.
    #[error("connection closed")]
    Closed,
    /// The inbound queue was closed while waiting for an envelope.
    #[error("inbound queue closed")]
    QueueClosed,
    /// A deadline elapsed before the operation completed.
    #[error("operation timed out")]
    Timeout,
    /// The connection went away before a correlated response arrived.
    #[error("connection lost before a response arrived")]
    Disconnected,
    /// Raw reads are unavailable because the read loop owns the transport reader.
    #[error("transport reader is owned by the read loop")]
    ReaderBusy,
    /// A synchronous request with this identifier is already awaiting a response.
    #[error("request id {0} already awaits a response")]
    DuplicateRequest(String),
}

impl ConnectionError {
    /// Returns true if this error represents an orderly close by the peer.
    #[must_use]
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::Lane(lane_error) if lane_error.is_clean_close())
    }

    /// Returns true if a deadline elapsed.
    #[must_use]
    pub fn is_timeout(&self) -> bool { matches!(self, Self::Timeout) }
}

/// Canonical result alias used by `wirelane` public APIs.
pub type Result<T, E = ConnectionError> = std::result::Result<T, E>;
