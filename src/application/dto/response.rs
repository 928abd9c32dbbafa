//! Response DTOs
//!
//! Data structures for REST response bodies. Ids are rendered as strings.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::ReceiptResult;
use crate::domain::{CallLog, DeliveryStatus, Message, MessageType, MessageView, Presence};

/// Message response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Viewer's delivery status (history only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        let deleted = message.is_deleted();
        Self {
            id: message.id.to_string(),
            chat_id: message.chat_id.to_string(),
            sender_id: message.sender_id.to_string(),
            message_type: message.message_type,
            // Deleted messages keep their slot in history but not their content.
            content: if deleted { String::new() } else { message.content },
            payload: if deleted { None } else { message.payload },
            reply_to: message.reply_to_id.map(|id| id.to_string()),
            created_at: message.created_at,
            edited_at: message.edited_at,
            deleted_at: message.deleted_at,
            status: None,
        }
    }
}

impl From<MessageView> for MessageResponse {
    fn from(view: MessageView) -> Self {
        let status = view.status;
        Self {
            status,
            ..Self::from(view.message)
        }
    }
}

/// Receipt response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub message_id: String,
    pub user_id: String,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    /// False when the report did not move the status forward
    pub changed: bool,
}

impl From<ReceiptResult> for ReceiptResponse {
    fn from(result: ReceiptResult) -> Self {
        Self {
            message_id: result.record.message_id.to_string(),
            user_id: result.record.user_id.to_string(),
            status: result.record.status,
            delivered_at: result.record.delivered_at,
            read_at: result.record.read_at,
            changed: result.changed,
        }
    }
}

/// Post-call record response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLogResponse {
    pub id: String,
    pub chat_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub video: bool,
    pub duration_secs: i32,
    pub ended_at: DateTime<Utc>,
}

impl From<CallLog> for CallLogResponse {
    fn from(log: CallLog) -> Self {
        Self {
            id: log.id.to_string(),
            chat_id: log.chat_id.to_string(),
            caller_id: log.caller_id.to_string(),
            callee_id: log.callee_id.to_string(),
            video: log.video,
            duration_secs: log.duration_secs,
            ended_at: log.ended_at,
        }
    }
}

/// Presence response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl From<Presence> for PresenceResponse {
    fn from(presence: Presence) -> Self {
        Self {
            user_id: presence.user_id.to_string(),
            is_online: presence.is_online,
            last_seen_at: presence.last_seen_at,
        }
    }
}
