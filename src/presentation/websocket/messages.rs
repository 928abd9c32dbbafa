//! WebSocket Message Types
//!
//! Client -> server frames. Every frame is `{"event", "data", "ack"?}`;
//! server -> client frames are [`crate::domain::RealtimeEvent`].

use serde::Deserialize;
use validator::Validate;

use crate::application::dto::request::SendMessageRequest;
use crate::domain::{CallSignalPayload, DeliveryStatus};
use crate::shared::snowflake::as_string;

/// Undecoded inbound frame.
#[derive(Debug, Deserialize)]
pub struct RawFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub ack: Option<u64>,
}

/// `message:send` body: the REST body plus the target chat.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SocketSendMessage {
    #[serde(with = "as_string")]
    pub chat_id: i64,
    #[serde(flatten)]
    #[validate(nested)]
    pub body: SendMessageRequest,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    #[serde(with = "as_string")]
    pub message_id: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRef {
    #[serde(with = "as_string")]
    pub chat_id: i64,
}

/// Decoded client event.
#[derive(Debug)]
pub enum ClientEvent {
    MessageSend(SocketSendMessage),
    Receipt(MessageRef, DeliveryStatus),
    TypingStart(ChatRef),
    TypingStop(ChatRef),
    ChatJoin(ChatRef),
    CallOffer(CallSignalPayload),
    CallAnswer(CallSignalPayload),
    CallIceCandidate(CallSignalPayload),
    CallReject(CallSignalPayload),
    CallEnd(CallSignalPayload),
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

impl FrameError {
    /// Error code carried in the `ack`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "invalid_payload",
            Self::UnknownEvent(_) => "unknown_event",
        }
    }
}

impl ClientEvent {
    pub fn decode(event: &str, data: serde_json::Value) -> Result<Self, FrameError> {
        Ok(match event {
            "message:send" => Self::MessageSend(serde_json::from_value(data)?),
            "message:delivered" => {
                Self::Receipt(serde_json::from_value(data)?, DeliveryStatus::Delivered)
            }
            "message:read" => Self::Receipt(serde_json::from_value(data)?, DeliveryStatus::Read),
            "typing:start" => Self::TypingStart(serde_json::from_value(data)?),
            "typing:stop" => Self::TypingStop(serde_json::from_value(data)?),
            "chat:join" => Self::ChatJoin(serde_json::from_value(data)?),
            "call:offer" => Self::CallOffer(serde_json::from_value(data)?),
            "call:answer" => Self::CallAnswer(serde_json::from_value(data)?),
            "call:ice-candidate" => Self::CallIceCandidate(serde_json::from_value(data)?),
            "call:reject" => Self::CallReject(serde_json::from_value(data)?),
            "call:end" => Self::CallEnd(serde_json::from_value(data)?),
            other => return Err(FrameError::UnknownEvent(other.to_string())),
        })
    }
}
