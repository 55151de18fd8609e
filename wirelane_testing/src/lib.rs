//! Utilities for exercising a [`Connection`](wirelane::Connection) over an
//! in-memory duplex transport during tests.
//!
//! [`duplex_connection`] builds a connection on one end of a
//! `tokio::io::duplex` pair and returns a [`PeerLane`] speaking the same
//! framing on the other end, so tests can play the remote peer.
//!
//! ```rust
//! use wirelane::{Envelope, Operation};
//! use wirelane_testing::duplex_connection;
//!
//! # async fn example() {
//! let (conn, mut peer) = duplex_connection(|opts| opts);
//! conn.serve_conn();
//! peer.send(&Envelope::new(Operation::Ping).with_id("7")).await;
//! let ack = peer.recv().await;
//! assert_eq!(ack.parent_id(), Some("7"));
//! # }
//! ```

mod dispatcher;
mod logging;
mod peer;

pub use dispatcher::{RecordingDispatcher, echo_handler};
pub use logging::{LoggerHandle, logger};
pub use peer::{
    DEFAULT_CAPACITY,
    PeerLane,
    duplex_connection,
    duplex_connection_with_capacity,
    read_exact,
    write_all,
};
