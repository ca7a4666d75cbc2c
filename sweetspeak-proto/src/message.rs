//! Wire format message types for the `SweetSpeak` protocol.
//!
//! Every frame on the wire is one [`Envelope`]: a fresh [`MessageId`], a
//! numeric [`MessageKind`] tag, and a payload whose shape is selected by the
//! tag. In memory the tag and payload are fused into the [`Payload`] sum type,
//! so an envelope whose kind disagrees with its payload cannot be built.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an envelope, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a chat session between paired identities.
///
/// Serialized as a plain string. The empty id is used in responses that
/// did not open a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Allocates a fresh, time-ordered chat identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the placeholder id carried by non-open responses.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

/// A party known to the relay: stable id, display name, and a cosmetic color.
///
/// Two identities are the same party when their ids match; the name and
/// color are presentation only.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Identity {
    /// Opaque unique identifier.
    pub id: String,
    /// Display name, also used for addressing chat requests.
    pub name: String,
    /// Terminal color the client renders this identity's name in.
    #[serde(default)]
    pub color: String,
}

impl Identity {
    /// Creates a new identity.
    pub fn new(id: impl Into<String>, name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: color.into(),
        }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::hash::Hash for Identity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.id, self.name)
    }
}

/// Numeric kind tag carried in the `message_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageKind {
    /// First message on every connection; identifies the client.
    Introduction,
    /// Text sent within an open chat session.
    Text,
    /// Online/offline notice. Defined on the wire, never routed by the relay.
    Status,
    /// Request to open a chat session with a named identity.
    ChatRequest,
    /// Outcome of a chat request.
    ChatResponse,
}

impl MessageKind {
    /// Wire code for this kind.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Introduction => 0,
            Self::Text => 1,
            Self::Status => 2,
            Self::ChatRequest => 3,
            Self::ChatResponse => 4,
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind.code()
    }
}

/// Error returned for a `message_type` code that names no known kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type {0}")]
pub struct UnknownKind(pub u8);

impl TryFrom<u8> for MessageKind {
    type Error = UnknownKind;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Introduction),
            1 => Ok(Self::Text),
            2 => Ok(Self::Status),
            3 => Ok(Self::ChatRequest),
            4 => Ok(Self::ChatResponse),
            other => Err(UnknownKind(other)),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Introduction => write!(f, "introduction"),
            Self::Text => write!(f, "text"),
            Self::Status => write!(f, "status"),
            Self::ChatRequest => write!(f, "chat-request"),
            Self::ChatResponse => write!(f, "chat-response"),
        }
    }
}

/// Outcome carried by a [`ChatResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ChatStatus {
    /// A session was opened; the response names it and its participants.
    Open,
    /// No identity with the requested display name is registered.
    UserNotFound,
    /// The requested identity is registered but its connection has closed.
    NotConnected,
}

impl From<ChatStatus> for u8 {
    fn from(status: ChatStatus) -> Self {
        match status {
            ChatStatus::Open => 0,
            ChatStatus::UserNotFound => 1,
            ChatStatus::NotConnected => 2,
        }
    }
}

/// Error returned for an unknown `chat_status` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown chat status {0}")]
pub struct UnknownStatus(pub u8);

impl TryFrom<u8> for ChatStatus {
    type Error = UnknownStatus;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Open),
            1 => Ok(Self::UserNotFound),
            2 => Ok(Self::NotConnected),
            other => Err(UnknownStatus(other)),
        }
    }
}

/// Payload of an Introduction envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Introduction {
    /// Per-process client identifier.
    pub client_id: String,
    /// The identity the client wants to be known as.
    pub user: Identity,
}

/// Payload of a text envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextMessage {
    /// Session the text belongs to.
    pub chat_id: ChatId,
    /// Author of the text.
    pub from: Identity,
    /// When the author wrote it.
    pub timestamp: Timestamp,
    /// The text itself.
    pub content: String,
}

/// Payload of a status envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusUpdate {
    /// Display name of the party whose status changed.
    pub from: String,
    /// Display name of the party being told.
    pub to: String,
    /// When the status changed.
    pub timestamp: Timestamp,
    /// Whether `from` is online.
    pub online: bool,
}

/// Payload of a chat request envelope. Both ends are display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    /// Display name of the requester.
    pub from: String,
    /// Display name of the party to pair with.
    pub to: String,
}

/// Payload of a chat response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatResponse {
    /// Opened session, or empty when `chat_status` is not `Open`.
    pub chat_id: ChatId,
    /// Session participants in pairing order; empty unless `Open`.
    #[serde(default)]
    pub users: Vec<Identity>,
    /// Outcome of the request.
    pub chat_status: ChatStatus,
}

/// Typed envelope payload; the variant determines the wire kind tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// See [`Introduction`].
    Introduction(Introduction),
    /// See [`TextMessage`].
    Text(TextMessage),
    /// See [`StatusUpdate`].
    Status(StatusUpdate),
    /// See [`ChatRequest`].
    ChatRequest(ChatRequest),
    /// See [`ChatResponse`].
    ChatResponse(ChatResponse),
}

impl Payload {
    /// The kind tag this payload is sent under.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Introduction(_) => MessageKind::Introduction,
            Self::Text(_) => MessageKind::Text,
            Self::Status(_) => MessageKind::Status,
            Self::ChatRequest(_) => MessageKind::ChatRequest,
            Self::ChatResponse(_) => MessageKind::ChatResponse,
        }
    }
}

/// One self-describing protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Unique per envelope; never reused.
    pub message_id: MessageId,
    /// Typed payload.
    pub payload: Payload,
}

impl Envelope {
    /// Wraps a payload under a freshly generated message id.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            message_id: MessageId::new(),
            payload,
        }
    }

    /// The kind tag of this envelope.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Builds an Introduction envelope.
    pub fn introduction(client_id: impl Into<String>, user: Identity) -> Self {
        Self::new(Payload::Introduction(Introduction {
            client_id: client_id.into(),
            user,
        }))
    }

    /// Builds a text envelope stamped with the current time.
    pub fn text(chat_id: ChatId, from: Identity, content: impl Into<String>) -> Self {
        Self::new(Payload::Text(TextMessage {
            chat_id,
            from,
            timestamp: Timestamp::now(),
            content: content.into(),
        }))
    }

    /// Builds a chat request envelope.
    pub fn chat_request(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(Payload::ChatRequest(ChatRequest {
            from: from.into(),
            to: to.into(),
        }))
    }

    /// Builds a chat response envelope.
    #[must_use]
    pub fn chat_response(chat_id: ChatId, users: Vec<Identity>, chat_status: ChatStatus) -> Self {
        Self::new(Payload::ChatResponse(ChatResponse {
            chat_id,
            users,
            chat_status,
        }))
    }

    /// Builds a status envelope stamped with the current time.
    pub fn status(from: impl Into<String>, to: impl Into<String>, online: bool) -> Self {
        Self::new(Payload::Status(StatusUpdate {
            from: from.into(),
            to: to.into(),
            timestamp: Timestamp::now(),
            online,
        }))
    }
}
