#![doc(html_root_url = "https://docs.rs/wirelane/latest")]
//! Public API for the `wirelane` library.
//!
//! This crate turns a duplex byte transport into a managed per-peer
//! connection: framed envelopes, automatic acknowledgement of control
//! messages, synchronous request/response correlation, pull-style or routed
//! delivery of inbound messages, deadlines and orderly close.

pub mod connection;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod fifo;
pub mod lane;
pub mod message;
pub mod metrics;
pub mod mux;
pub mod panic;
pub mod prelude;

pub use connection::{
    Connection,
    ConnectionOptions,
    ConnectionState,
    ConnStatus,
    UseType,
    active_connection_count,
};
pub use correlation::{SyncKeeper, WaitHandle};
pub use envelope::{Envelope, Operation, ResponseKind};
pub use error::{ConnectionError, Result};
pub use fifo::{InboundQueue, OverflowPolicy, QueueConfig, QueueError};
pub use lane::{LaneConfig, LaneError};
pub use metrics::{CONNECTIONS_ACTIVE, CONTROL_ACKS_TOTAL, Direction, ERRORS_TOTAL, FRAMES_TOTAL};
pub use mux::{Dispatcher, MessageMux, MessageRequest, ResponseWriter};
