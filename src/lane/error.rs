//! Error types for the lane layer.
//!
//! [`LaneError`] separates wire-level framing failures, envelope
//! (de)serialization failures and end-of-stream conditions so the read loop
//! can log an orderly peer close differently from a broken transport.

use std::io;

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

/// EOF variants distinguishing normal vs. premature closure.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// Clean EOF at a frame boundary.
    #[error("connection closed cleanly at frame boundary")]
    CleanClose,

    /// EOF after the length prefix but before the full payload arrived.
    #[error("premature EOF mid-frame: received {bytes_received} of {expected} bytes")]
    MidFrame {
        /// Payload bytes received before EOF.
        bytes_received: usize,
        /// Payload length announced by the prefix.
        expected: usize,
    },

    /// EOF before the length prefix was complete.
    #[error("premature EOF mid-header: received {bytes_received} of {header_size} header bytes")]
    MidHeader {
        /// Header bytes received before EOF.
        bytes_received: usize,
        /// Expected header size.
        header_size: usize,
    },
}

/// Failures raised while moving envelopes or bytes across a lane.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaneError {
    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// End-of-stream handling.
    #[error("EOF: {0}")]
    Eof(#[from] EofError),

    /// Outbound frame larger than the configured maximum.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Encoded envelope size.
        size: usize,
        /// Maximum permitted frame size.
        max: usize,
    },

    /// The envelope could not be encoded.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] EncodeError),

    /// A frame did not contain a valid envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] DecodeError),
}

impl LaneError {
    /// Returns true if the peer closed the transport at a frame boundary.
    #[must_use]
    pub fn is_clean_close(&self) -> bool { matches!(self, Self::Eof(EofError::CleanClose)) }
}
