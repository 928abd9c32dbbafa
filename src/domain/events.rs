//! Real-time events pushed to clients, and the audiences they target.
//!
//! Every frame on the wire is `{"event": "<name>", "data": {...}}`. The
//! same serialized frame is handed to local connections and forwarded over
//! the backplane, so an event is encoded exactly once per emission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entities::{Message, MessageType};
use crate::shared::snowflake::{as_string, as_string_opt};

/// Server -> client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    #[serde(rename = "ready")]
    Ready(ReadyPayload),
    #[serde(rename = "ack")]
    Ack(AckPayload),
    #[serde(rename = "message:new")]
    MessageNew(MessagePayload),
    #[serde(rename = "message:updated")]
    MessageUpdated(MessageChangePayload),
    #[serde(rename = "message:deleted")]
    MessageDeleted(MessageChangePayload),
    #[serde(rename = "message:delivered")]
    MessageDelivered(ReceiptPayload),
    #[serde(rename = "message:read")]
    MessageRead(ReceiptPayload),
    #[serde(rename = "typing:start")]
    TypingStart(TypingPayload),
    #[serde(rename = "typing:stop")]
    TypingStop(TypingPayload),
    #[serde(rename = "presence:changed")]
    PresenceChanged(PresencePayload),
    #[serde(rename = "call:offer")]
    CallOffer(CallSignalPayload),
    #[serde(rename = "call:answer")]
    CallAnswer(CallSignalPayload),
    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate(CallSignalPayload),
    #[serde(rename = "call:reject")]
    CallReject(CallSignalPayload),
    #[serde(rename = "call:end")]
    CallEnd(CallSignalPayload),
    #[serde(rename = "call:unavailable")]
    CallUnavailable(CallSignalPayload),
}

impl RealtimeEvent {
    /// Wire name, used for metrics labels and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::Ack(_) => "ack",
            Self::MessageNew(_) => "message:new",
            Self::MessageUpdated(_) => "message:updated",
            Self::MessageDeleted(_) => "message:deleted",
            Self::MessageDelivered(_) => "message:delivered",
            Self::MessageRead(_) => "message:read",
            Self::TypingStart(_) => "typing:start",
            Self::TypingStop(_) => "typing:stop",
            Self::PresenceChanged(_) => "presence:changed",
            Self::CallOffer(_) => "call:offer",
            Self::CallAnswer(_) => "call:answer",
            Self::CallIceCandidate(_) => "call:ice-candidate",
            Self::CallReject(_) => "call:reject",
            Self::CallEnd(_) => "call:end",
            Self::CallUnavailable(_) => "call:unavailable",
        }
    }

    /// Encode as a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// First frame on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    #[serde(with = "as_string")]
    pub user_id: i64,
    pub connection_id: Uuid,
    pub chat_ids: Vec<String>,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub typing_ttl_ms: u64,
}

/// Reply to a client frame that carried an `ack` number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub ack: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<serde_json::Value>,
}

impl AckPayload {
    pub fn ok(ack: u64, data: Option<serde_json::Value>) -> Self {
        Self {
            ack,
            ok: true,
            error: None,
            data,
        }
    }

    pub fn error(ack: u64, code: &str) -> Self {
        Self {
            ack,
            ok: false,
            error: Some(code.to_string()),
            data: None,
        }
    }
}

/// `message:new` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(with = "as_string")]
    pub id: i64,
    #[serde(with = "as_string")]
    pub chat_id: i64,
    #[serde(with = "as_string")]
    pub sender_id: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(with = "as_string_opt", skip_serializing_if = "Option::is_none", default)]
    pub reply_to: Option<i64>,
}

impl From<&Message> for MessagePayload {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            message_type: message.message_type,
            content: message.content.clone(),
            payload: message.payload.clone(),
            created_at: message.created_at,
            reply_to: message.reply_to_id,
        }
    }
}

/// `message:updated` / `message:deleted`.
///
/// Clients apply it only if `updatedAt` is newer than what they hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageChangePayload {
    #[serde(with = "as_string")]
    pub id: i64,
    #[serde(with = "as_string")]
    pub chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// `message:delivered` / `message:read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptPayload {
    #[serde(with = "as_string")]
    pub message_id: i64,
    #[serde(with = "as_string")]
    pub chat_id: i64,
    #[serde(with = "as_string")]
    pub user_id: i64,
    pub at: DateTime<Utc>,
}

/// `typing:start` / `typing:stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(with = "as_string")]
    pub chat_id: i64,
    #[serde(with = "as_string")]
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expires_in_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    #[serde(with = "as_string")]
    pub user_id: i64,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Any `call:*` frame. SDP and ICE blobs are relayed untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignalPayload {
    #[serde(with = "as_string")]
    pub chat_id: i64,
    /// The other party from the receiver's point of view
    #[serde(with = "as_string", alias = "calleeId")]
    pub peer_id: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub offer: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub answer: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub candidate: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub video: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_secs: Option<u32>,
}

/// Connections excluded from a chat broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Except {
    #[default]
    Nobody,
    /// One connection (the originator)
    Connection(Uuid),
    /// Every connection of a user
    User(i64),
}

/// Target set of an emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Audience {
    /// Union of the chats' rooms; a connection in several of them still
    /// receives the event once.
    Chats { chat_ids: Vec<i64>, except: Except },
    /// Every connection of one user, on any instance.
    User { user_id: i64 },
    /// A single connection on this instance.
    Connection { connection_id: Uuid },
}

impl Audience {
    pub fn chat(chat_id: i64) -> Self {
        Self::Chats {
            chat_ids: vec![chat_id],
            except: Except::Nobody,
        }
    }

    pub fn chat_except_user(chat_id: i64, user_id: i64) -> Self {
        Self::Chats {
            chat_ids: vec![chat_id],
            except: Except::User(user_id),
        }
    }

    pub fn user(user_id: i64) -> Self {
        Self::User { user_id }
    }

    pub fn connection(connection_id: Uuid) -> Self {
        Self::Connection { connection_id }
    }

    /// Connection-addressed events never cross the backplane.
    pub fn is_local_only(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Sink for real-time events.
///
/// Implementations deliver to local connections and forward to other
/// instances. Publishing never fails from the caller's point of view;
/// transport problems are logged and counted by the implementation.
#[cfg_attr(test, mockall::automock)]
pub trait EventPublisher: Send + Sync {
    fn publish(&self, audience: Audience, event: RealtimeEvent);
}
