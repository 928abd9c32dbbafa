//! Message entity and repository trait.
//!
//! Maps to the `messages` table. A message row is written exactly once by
//! the send path; edits and deletes only touch `content`, `edited_at` and
//! `deleted_at`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::delivery::DeliveryStatus;
use crate::shared::error::AppError;

/// Maximum message content length in characters.
pub const MAX_CONTENT_LENGTH: usize = 4000;

/// Message kinds carried by the chat product.
///
/// Media kinds keep their metadata (url, dimensions, duration) in the JSON
/// `payload`; `content` holds the caption or text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    File,
    Sticker,
    /// Call summary posted after a call ends
    Call,
    /// Server-generated notice (member added, chat renamed, ...)
    System,
}

impl MessageType {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "file" => Self::File,
            "sticker" => Self::Sticker,
            "call" => Self::Call,
            "system" => Self::System,
            _ => Self::Text,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::Sticker => "sticker",
            Self::Call => "call",
            Self::System => "system",
        }
    }

    /// Media kinds must carry a payload describing the attachment.
    pub fn requires_payload(&self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::Audio | Self::File | Self::Sticker)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Represents a message in a chat.
///
/// Maps to the `messages` table:
/// - id: BIGINT PRIMARY KEY (Snowflake ID)
/// - chat_id: BIGINT NOT NULL REFERENCES chats(id)
/// - sender_id: BIGINT NOT NULL REFERENCES users(id)
/// - message_type: TEXT NOT NULL
/// - content: TEXT NOT NULL
/// - payload: JSONB NULL
/// - reply_to_id: BIGINT NULL REFERENCES messages(id)
/// - created_at / edited_at / deleted_at: TIMESTAMPTZ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub message_type: MessageType,
    pub content: String,
    pub payload: Option<serde_json::Value>,
    pub reply_to_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Timestamp of the latest change; clients apply updates only when this
    /// moves forward.
    pub fn updated_at(&self) -> DateTime<Utc> {
        [Some(self.created_at), self.edited_at, self.deleted_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.created_at)
    }
}

/// A message as seen by one viewer, with that viewer's delivery status.
///
/// For a recipient the status is their own record; for the sender it is the
/// least advanced status among all recipients. `None` when the chat has no
/// other members.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: Message,
    pub status: Option<DeliveryStatus>,
}

/// Repository trait for message persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist a new message together with a `sent` delivery record for every
    /// other member of the chat, in one transaction.
    async fn create(&self, message: &Message) -> Result<Message, AppError>;

    /// Find a message by its Snowflake ID.
    async fn find_by_id(&self, id: i64) -> Result<Option<Message>, AppError>;

    /// Keyset page of a chat's history, newest first.
    async fn find_page(
        &self,
        chat_id: i64,
        viewer_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<MessageView>, AppError>;

    /// Replace the content of a message and stamp `edited_at`.
    async fn update_content(
        &self,
        id: i64,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Message, AppError>;

    /// Mark a message deleted. The row is kept so history pages stay stable.
    async fn soft_delete(&self, id: i64, deleted_at: DateTime<Utc>) -> Result<Message, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn message_type_round_trips_through_db_strings() {
        for kind in [
            MessageType::Text,
            MessageType::Image,
            MessageType::Video,
            MessageType::Audio,
            MessageType::File,
            MessageType::Sticker,
            MessageType::Call,
            MessageType::System,
        ] {
            assert_eq!(MessageType::from_str(kind.as_str()), kind);
        }
        assert_eq!(MessageType::from_str("unknown"), MessageType::Text);
    }

    #[test]
    fn updated_at_tracks_latest_change() {
        let created = Utc::now();
        let mut message = Message {
            id: 1,
            chat_id: 1,
            sender_id: 1,
            message_type: MessageType::Text,
            content: "hi".into(),
            payload: None,
            reply_to_id: None,
            created_at: created,
            edited_at: None,
            deleted_at: None,
        };
        assert_eq!(message.updated_at(), created);

        message.edited_at = Some(created + Duration::seconds(5));
        message.deleted_at = Some(created + Duration::seconds(9));
        assert_eq!(message.updated_at(), created + Duration::seconds(9));
        assert!(message.is_deleted());
    }
}
