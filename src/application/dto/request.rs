//! Request DTOs
//!
//! Data structures for REST request bodies and query strings.

use serde::Deserialize;
use validator::Validate;

use crate::application::services::SendMessageDto;
use crate::domain::{DeliveryStatus, MessageType};
use crate::shared::snowflake::as_string_opt;

/// Send message request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(rename = "type", default)]
    pub message_type: MessageType,

    #[validate(length(max = 4000, message = "Content must be at most 4000 characters"))]
    #[serde(default)]
    pub content: String,

    pub payload: Option<serde_json::Value>,

    #[serde(with = "as_string_opt", default)]
    pub reply_to: Option<i64>,
}

impl SendMessageRequest {
    pub fn into_dto(self, chat_id: i64) -> SendMessageDto {
        SendMessageDto {
            chat_id,
            message_type: self.message_type,
            content: self.content,
            payload: self.payload,
            reply_to: self.reply_to,
        }
    }
}

/// Edit message request
#[derive(Debug, Deserialize, Validate)]
pub struct EditMessageRequest {
    #[validate(length(min = 1, max = 4000, message = "Content must be 1-4000 characters"))]
    pub content: String,
}

/// Delivery/read acknowledgment over REST
#[derive(Debug, Deserialize)]
pub struct ReceiptRequest {
    pub status: DeliveryStatus,
}

/// History page query (`?before=<id>&limit=<n>`)
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<i64>,
    pub limit: Option<i64>,
}
