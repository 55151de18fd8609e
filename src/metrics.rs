//! Metric helpers for `wirelane`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open connections.
pub const CONNECTIONS_ACTIVE: &str = "wirelane_connections_active";
/// Name of the counter tracking envelopes crossing a lane.
pub const FRAMES_TOTAL: &str = "wirelane_frames_total";
/// Name of the counter tracking control messages acknowledged by the core.
pub const CONTROL_ACKS_TOTAL: &str = "wirelane_control_acks_total";
/// Name of the counter tracking read loop and handler failures.
pub const ERRORS_TOTAL: &str = "wirelane_errors_total";

/// Direction of an envelope relative to this side of the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Envelopes read from the peer.
    Inbound,
    /// Envelopes written to the peer.
    Outbound,
}

impl Direction {
    /// Label value used for the `direction` label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an envelope for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a control message acknowledged by the read loop.
pub fn inc_control_acks() {
    #[cfg(feature = "metrics")]
    counter!(CONTROL_ACKS_TOTAL).increment(1);
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}
