//! Realtime channel events.
//!
//! Every frame on the channel is an "adjacently tagged" JSON object:
//!
//! ```text
//! { "event": "send_message", "data": { "sender_id": "u1", ... } }
//! ```
//!
//! `event` names the kind in snake_case and `data` carries the fields.
//! Client → server and server → client events are separate enums, so the
//! type system stops a client from ever emitting a server-only event.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Server-assigned user identifier.
///
/// The server issues these as opaque strings (database ids), so unlike a
/// numeric id there is nothing to parse; the newtype only stops a user id
/// from being passed where a message id is expected.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Creates a user id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned chat message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Creates a message id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Binds the channel to a bearer token.
    Authenticate { token: String },

    /// Sends a chat message, optionally about a listed item.
    SendMessage {
        sender_id: UserId,
        receiver_id: UserId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
    },

    /// Tells a peer the sender is typing.
    Typing { sender_id: UserId, receiver_id: UserId },

    /// Marks a received message as read.
    MarkRead { message_id: MessageId },
}

impl ClientEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::SendMessage { .. } => "send_message",
            Self::Typing { .. } => "typing",
            Self::MarkRead { .. } => "mark_read",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// A listed item a chat message refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// A chat message as the server reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    /// ISO-8601 timestamp, kept as text; this layer never does arithmetic
    /// on it.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub item: Option<ItemRef>,
}

fn authentication_failed() -> String {
    "Authentication failed".to_string()
}

fn unknown_socket_error() -> String {
    "Unknown socket error".to_string()
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Greeting sent right after the transport connects.
    ConnectResponse {
        status: String,
        #[serde(default)]
        sid: Option<String>,
    },

    /// The channel is bound to the identity of the presented token.
    Authenticated { user_id: UserId, username: String },

    /// The presented token was rejected. The channel stays open.
    AuthenticationError {
        #[serde(default = "authentication_failed")]
        message: String,
    },

    /// Another login took over this user's channel.
    SessionExpired { message: String },

    /// A message addressed to this user arrived.
    NewMessage(ChatMessage),

    /// Echo confirming a message this user sent was stored.
    MessageSent(ChatMessage),

    /// A message this user sent was read by its receiver.
    MessageRead {
        message_id: MessageId,
        #[serde(default)]
        read_at: Option<String>,
    },

    /// Confirms this user's own `mark_read`.
    MarkedRead { message_id: MessageId },

    /// A peer is typing to this user.
    UserTyping { sender_id: UserId },

    /// Generic server-side failure for the last request.
    Error {
        #[serde(default = "unknown_socket_error")]
        message: String,
    },
}

impl ServerEvent {
    /// The subscription key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectResponse { .. } => EventKind::ConnectResponse,
            Self::Authenticated { .. } => EventKind::Authenticated,
            Self::AuthenticationError { .. } => EventKind::AuthenticationError,
            Self::SessionExpired { .. } => EventKind::SessionExpired,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::MessageRead { .. } => EventKind::MessageRead,
            Self::MarkedRead { .. } => EventKind::MarkedRead,
            Self::UserTyping { .. } => EventKind::UserTyping,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

/// Discriminant of [`ServerEvent`], used as a subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectResponse,
    Authenticated,
    AuthenticationError,
    SessionExpired,
    NewMessage,
    MessageSent,
    MessageRead,
    MarkedRead,
    UserTyping,
    Error,
}

impl EventKind {
    /// Event name as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectResponse => "connect_response",
            Self::Authenticated => "authenticated",
            Self::AuthenticationError => "authentication_error",
            Self::SessionExpired => "session_expired",
            Self::NewMessage => "new_message",
            Self::MessageSent => "message_sent",
            Self::MessageRead => "message_read",
            Self::MarkedRead => "marked_read",
            Self::UserTyping => "user_typing",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // -- Client events: exact wire shape -----------------------------------

    #[test]
    fn test_authenticate_wire_shape() {
        let event = ClientEvent::Authenticate { token: "abc".into() };

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({ "event": "authenticate", "data": { "token": "abc" } })
        );
    }

    #[test]
    fn test_send_message_omits_absent_item() {
        let event = ClientEvent::SendMessage {
            sender_id: UserId::new("u1"),
            receiver_id: UserId::new("u2"),
            content: "hi".into(),
            item_id: None,
        };

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({
                "event": "send_message",
                "data": { "sender_id": "u1", "receiver_id": "u2", "content": "hi" }
            })
        );
    }

    #[test]
    fn test_send_message_includes_item_when_present() {
        let event = ClientEvent::SendMessage {
            sender_id: UserId::new("u1"),
            receiver_id: UserId::new("u2"),
            content: "is this still available?".into(),
            item_id: Some("item-9".into()),
        };

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["data"]["item_id"], "item-9");
    }

    #[test]
    fn test_mark_read_wire_shape() {
        let event = ClientEvent::MarkRead { message_id: MessageId::new("m1") };

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({ "event": "mark_read", "data": { "message_id": "m1" } })
        );
        assert_eq!(event.name(), "mark_read");
    }

    // -- Server events: parsing --------------------------------------------

    #[test]
    fn test_parse_authenticated() {
        let raw = json!({
            "event": "authenticated",
            "data": { "user_id": "u1", "username": "alice" }
        });

        let event: ServerEvent = serde_json::from_value(raw).unwrap();

        assert_eq!(
            event,
            ServerEvent::Authenticated {
                user_id: UserId::new("u1"),
                username: "alice".into(),
            }
        );
        assert_eq!(event.kind(), EventKind::Authenticated);
    }

    #[test]
    fn test_parse_authentication_error_defaults_message() {
        let raw = json!({ "event": "authentication_error", "data": {} });

        let event: ServerEvent = serde_json::from_value(raw).unwrap();

        assert_eq!(
            event,
            ServerEvent::AuthenticationError {
                message: "Authentication failed".into()
            }
        );
    }

    #[test]
    fn test_parse_new_message_with_item() {
        let raw = json!({
            "event": "new_message",
            "data": {
                "id": "m1",
                "sender_id": "u2",
                "receiver_id": "u1",
                "content": "hello",
                "timestamp": "2024-05-01T10:00:00",
                "read": false,
                "item": { "id": "i1", "title": "Desk lamp" }
            }
        });

        let event: ServerEvent = serde_json::from_value(raw).unwrap();

        let ServerEvent::NewMessage(msg) = event else {
            panic!("expected NewMessage");
        };
        assert_eq!(msg.id, MessageId::new("m1"));
        assert_eq!(msg.item.unwrap().title.as_deref(), Some("Desk lamp"));
    }

    #[test]
    fn test_parse_unknown_event_is_error() {
        let raw = json!({ "event": "surprise", "data": {} });

        let result: Result<ServerEvent, _> = serde_json::from_value(raw);

        assert!(result.is_err(), "unknown events must not parse");
    }

    #[test]
    fn test_parse_missing_required_field_is_error() {
        // `authenticated` without a username.
        let raw = json!({ "event": "authenticated", "data": { "user_id": "u1" } });

        let result: Result<ServerEvent, _> = serde_json::from_value(raw);

        assert!(result.is_err());
    }

    #[test]
    fn test_event_kind_names_match_wire_names() {
        let event = ServerEvent::UserTyping { sender_id: UserId::new("u3") };

        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event"], event.kind().as_str());
    }
}
