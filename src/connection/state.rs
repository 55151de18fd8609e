//! Connection status and peer identity.

use std::collections::HashMap;

use tokio::sync::watch;

/// Header naming the peer node, reported to the transport error callback.
pub const NODE_ID_HEADER: &str = "node_id";
/// Header naming the peer project, reported to the transport error callback.
pub const PROJECT_ID_HEADER: &str = "project_id";

/// Liveness of a connection.
///
/// The only transition is `Connected` to `Disconnected`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnStatus {
    #[default]
    Connected,
    Disconnected,
}

/// Snapshot of a connection's status and peer identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnStatus,
    /// Peer metadata captured at handshake time.
    pub headers: HashMap<String, String>,
    /// DER-encoded certificates presented by the peer.
    pub peer_certificates: Vec<Vec<u8>>,
}

impl ConnectionState {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Add a peer header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Record a peer certificate.
    #[must_use]
    pub fn with_peer_certificate(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.peer_certificates.push(der.into());
        self
    }

    /// Value of [`NODE_ID_HEADER`], or an empty string.
    #[must_use]
    pub fn node_id(&self) -> &str { self.header(NODE_ID_HEADER) }

    /// Value of [`PROJECT_ID_HEADER`], or an empty string.
    #[must_use]
    pub fn project_id(&self) -> &str { self.header(PROJECT_ID_HEADER) }

    fn header(&self, key: &str) -> &str { self.headers.get(key).map_or("", String::as_str) }
}

/// Shared, observable connection state.
///
/// Identity is fixed at construction; only the status changes.
pub(super) struct StateCell {
    status: watch::Sender<ConnStatus>,
    identity: ConnectionState,
}

impl StateCell {
    pub(super) fn new(state: ConnectionState) -> Self {
        let (status, _) = watch::channel(state.status);
        Self {
            status,
            identity: state,
        }
    }

    /// Move to `Disconnected`.
    ///
    /// Returns true only for the caller that performed the transition.
    pub(super) fn mark_disconnected(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == ConnStatus::Connected {
                *status = ConnStatus::Disconnected;
                true
            } else {
                false
            }
        })
    }

    pub(super) fn status(&self) -> ConnStatus { *self.status.borrow() }

    pub(super) fn is_connected(&self) -> bool { self.status() == ConnStatus::Connected }

    pub(super) fn subscribe(&self) -> watch::Receiver<ConnStatus> { self.status.subscribe() }

    pub(super) fn identity(&self) -> &ConnectionState { &self.identity }

    pub(super) fn snapshot(&self) -> ConnectionState {
        ConnectionState {
            status: self.status(),
            ..self.identity.clone()
        }
    }
}
