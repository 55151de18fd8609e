//! Optional convenience imports for common `wirelane` workflows.
//!
//! Prefer importing specialised APIs directly from their owning modules.
//!
//! # Examples
//!
//! ```rust,no_run
//! use wirelane::prelude::*;
//!
//! async fn ping(conn: &Connection<tokio::io::DuplexStream>) -> Result<Envelope> {
//!     conn.write_message_sync(Envelope::new(Operation::Ping)).await
//! }
//! ```

pub use crate::{
    connection::{Connection, ConnectionOptions, ConnectionState, UseType},
    envelope::{Envelope, Operation, ResponseKind},
    error::{ConnectionError, Result},
    message::Message,
    mux::{Dispatcher, MessageMux, MessageRequest, ResponseWriter, handler},
};
