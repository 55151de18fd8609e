//! Envelope types exchanged over a connection.
//!
//! An [`Envelope`] carries a [`MessageHeader`] (identity and sync flag), a
//! [`MessageRoute`] (source, group, operation, resource) and an opaque
//! payload. The operation is a closed [`Operation`] enum so control traffic
//! is classified by an exhaustive `match` rather than string comparison.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use uuid::Uuid;

/// Operation carried in a [`MessageRoute`].
#[derive(bincode::Decode, bincode::Encode, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Peer configuration push; acknowledged by the connection core.
    ConfigSync,
    /// Liveness probe; acknowledged by the connection core.
    Ping,
    /// Liveness reply; acknowledged by the connection core.
    Pong,
    /// Response derived from a request via [`Envelope::respond_to`].
    Response,
    Insert,
    Update,
    Delete,
    Query,
    /// Application-defined operation.
    Custom(String),
}

/// Control operations intercepted by the read loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKind {
    ConfigSync,
    Ping,
    Pong,
}

impl Operation {
    /// Classify this operation as a control operation, if it is one.
    #[must_use]
    pub fn control_kind(&self) -> Option<ControlKind> {
        match self {
            Self::ConfigSync => Some(ControlKind::ConfigSync),
            Self::Ping => Some(ControlKind::Ping),
            Self::Pong => Some(ControlKind::Pong),
            Self::Response
            | Self::Insert
            | Self::Update
            | Self::Delete
            | Self::Query
            | Self::Custom(_) => None,
        }
    }

    /// Returns true for operations acknowledged by the connection core.
    #[must_use]
    pub fn is_control(&self) -> bool { self.control_kind().is_some() }

    /// Name used in logs and by peers speaking the textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConfigSync => "config",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Response => "response",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Query => "query",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for Operation {
    fn from(value: &str) -> Self {
        match value {
            "config" => Self::ConfigSync,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "response" => Self::Response,
            "insert" => Self::Insert,
            "update" => Self::Update,
            "delete" => Self::Delete,
            "query" => Self::Query,
            other => Self::Custom(other.to_owned()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Marker placed in the content of a derived response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    /// Plain acknowledgement; content is [`ACK_CONTENT`].
    Ack,
    /// Failure report; content is the UTF-8 reason.
    Error(String),
    /// Arbitrary response payload.
    Content(Vec<u8>),
}

/// Payload of an acknowledgement response.
pub const ACK_CONTENT: &[u8] = b"ack";

/// Identity and delivery flags of an [`Envelope`].
#[derive(bincode::Decode, bincode::Encode, Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub(crate) id: String,
    pub(crate) parent_id: Option<String>,
    pub(crate) timestamp: i64,
    pub(crate) sync: bool,
}

/// Routing metadata of an [`Envelope`].
#[derive(bincode::Decode, bincode::Encode, Clone, Debug, PartialEq, Eq)]
pub struct MessageRoute {
    pub(crate) source: String,
    pub(crate) group: String,
    pub(crate) operation: Operation,
    pub(crate) resource: String,
}

/// Unit message exchanged over a connection.
///
/// # Examples
///
/// ```
/// use wirelane::envelope::{Envelope, Operation, ResponseKind};
///
/// let ping = Envelope::new(Operation::Ping).with_id("7");
/// let ack = ping.respond_to(ResponseKind::Ack);
/// assert_eq!(ack.parent_id(), Some("7"));
/// assert_eq!(ack.operation(), &Operation::Response);
/// ```
#[derive(bincode::Decode, bincode::Encode, Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub(crate) header: MessageHeader,
    pub(crate) router: MessageRoute,
    pub(crate) content: Vec<u8>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

impl Envelope {
    /// Create an envelope with a fresh identifier and an empty route.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            header: MessageHeader {
                id: Uuid::new_v4().to_string(),
                parent_id: None,
                timestamp: now_millis(),
                sync: false,
            },
            router: MessageRoute {
                source: String::new(),
                group: String::new(),
                operation,
                resource: String::new(),
            },
            content: Vec::new(),
        }
    }

    /// Replace the generated identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.header.id = id.into();
        self
    }

    /// Set the source and group used for routing.
    #[must_use]
    pub fn with_route(mut self, source: impl Into<String>, group: impl Into<String>) -> Self {
        self.router.source = source.into();
        self.router.group = group.into();
        self
    }

    /// Set the resource path this envelope addresses.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.router.resource = resource.into();
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    /// Derive a response correlated to this envelope.
    ///
    /// The response gets a fresh identifier, records this envelope's id as
    /// its parent, swaps the route back towards the sender and keeps the
    /// sync flag so the peer's correlator recognises it.
    #[must_use]
    pub fn respond_to(&self, kind: ResponseKind) -> Self {
        let content = match kind {
            ResponseKind::Ack => ACK_CONTENT.to_vec(),
            ResponseKind::Error(reason) => reason.into_bytes(),
            ResponseKind::Content(bytes) => bytes,
        };
        let mut response = Self::new(Operation::Response)
            .with_route(self.router.source.clone(), self.router.group.clone())
            .with_resource(self.router.resource.clone())
            .with_content(content);
        response.header.parent_id = Some(self.header.id.clone());
        response.header.sync = self.header.sync;
        response
    }

    #[must_use]
    pub fn id(&self) -> &str { &self.header.id }

    /// Identifier of the request this envelope responds to, if any.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> { self.header.parent_id.as_deref() }

    #[must_use]
    pub fn timestamp(&self) -> i64 { self.header.timestamp }

    #[must_use]
    pub fn is_sync(&self) -> bool { self.header.sync }

    pub fn set_sync(&mut self, sync: bool) { self.header.sync = sync; }

    #[must_use]
    pub fn operation(&self) -> &Operation { &self.router.operation }

    #[must_use]
    pub fn source(&self) -> &str { &self.router.source }

    #[must_use]
    pub fn group(&self) -> &str { &self.router.group }

    #[must_use]
    pub fn resource(&self) -> &str { &self.router.resource }

    #[must_use]
    pub fn content(&self) -> &[u8] { &self.content }

    #[must_use]
    pub fn into_content(self) -> Vec<u8> { self.content }

    /// Returns the control kind if this envelope is a control message.
    #[must_use]
    pub fn control_kind(&self) -> Option<ControlKind> { self.router.operation.control_kind() }

    /// Returns true if this envelope acknowledges a request.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.router.operation == Operation::Response && self.content == ACK_CONTENT
    }
}
