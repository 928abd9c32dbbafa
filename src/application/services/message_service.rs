//! Message Service
//!
//! Send, edit, delete and history. Every write is persisted before the
//! corresponding event is published, so a client never observes an event
//! for a message the store does not have.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{
    Audience, EventPublisher, MembershipRepository, Message, MessageChangePayload,
    MessagePayload, MessageRepository, MessageType, MessageView, RealtimeEvent,
    MAX_CONTENT_LENGTH,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;
use crate::shared::snowflake::SnowflakeGenerator;

/// Default and maximum page size for history queries.
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Message service trait
#[async_trait]
pub trait MessageService: Send + Sync {
    /// Persist a message and fan it out to the chat room.
    async fn send(&self, sender_id: i64, request: SendMessageDto) -> Result<Message, MessageError>;

    /// Author-only content edit.
    async fn edit(&self, message_id: i64, actor_id: i64, content: String) -> Result<Message, MessageError>;

    /// Author-only soft delete. Deleting twice is a no-op.
    async fn delete(&self, message_id: i64, actor_id: i64) -> Result<(), MessageError>;

    /// Page of a chat's history with the viewer's delivery status.
    async fn history(
        &self,
        chat_id: i64,
        viewer_id: i64,
        before: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<MessageView>, MessageError>;
}

/// Send message input, shared by the socket and REST paths.
#[derive(Debug, Clone)]
pub struct SendMessageDto {
    pub chat_id: i64,
    pub message_type: MessageType,
    pub content: String,
    pub payload: Option<serde_json::Value>,
    pub reply_to: Option<i64>,
}

/// Message service errors
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Message not found")]
    NotFound,

    #[error("Not a member of this chat or not the author")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl From<MessageError> for AppError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::NotFound => AppError::NotFound("Message not found".into()),
            MessageError::Forbidden => AppError::Forbidden("Not allowed to access this message".into()),
            MessageError::Validation(msg) => AppError::Validation(msg),
            MessageError::Persistence(msg) => AppError::Internal(msg),
        }
    }
}

/// MessageService implementation
pub struct MessageServiceImpl<M, Mem>
where
    M: MessageRepository + ?Sized,
    Mem: MembershipRepository + ?Sized,
{
    message_repo: Arc<M>,
    member_repo: Arc<Mem>,
    publisher: Arc<dyn EventPublisher>,
    id_generator: Arc<SnowflakeGenerator>,
}

impl<M, Mem> MessageServiceImpl<M, Mem>
where
    M: MessageRepository + ?Sized,
    Mem: MembershipRepository + ?Sized,
{
    pub fn new(
        message_repo: Arc<M>,
        member_repo: Arc<Mem>,
        publisher: Arc<dyn EventPublisher>,
        id_generator: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            message_repo,
            member_repo,
            publisher,
            id_generator,
        }
    }

    async fn ensure_member(&self, chat_id: i64, user_id: i64) -> Result<(), MessageError> {
        let is_member = self
            .member_repo
            .is_member(chat_id, user_id)
            .await
            .map_err(|e| persistence("membership_lookup", e))?;

        if is_member {
            Ok(())
        } else {
            Err(MessageError::Forbidden)
        }
    }

    /// Load a message the actor is allowed to change.
    async fn find_own(&self, message_id: i64, actor_id: i64) -> Result<Message, MessageError> {
        let message = self
            .message_repo
            .find_by_id(message_id)
            .await
            .map_err(|e| persistence("message_lookup", e))?
            .ok_or(MessageError::NotFound)?;

        if message.sender_id != actor_id {
            return Err(MessageError::Forbidden);
        }
        Ok(message)
    }
}

fn persistence(operation: &'static str, err: AppError) -> MessageError {
    metrics::record_persistence_failure(operation);
    tracing::error!(operation, error = %err, "Message store operation failed");
    MessageError::Persistence(err.to_string())
}

fn validate_content(content: &str, allow_empty: bool) -> Result<(), MessageError> {
    if !allow_empty && content.trim().is_empty() {
        return Err(MessageError::Validation("Message content must not be empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(MessageError::Validation(format!(
            "Message content must be at most {} characters",
            MAX_CONTENT_LENGTH
        )));
    }
    Ok(())
}

#[async_trait]
impl<M, Mem> MessageService for MessageServiceImpl<M, Mem>
where
    M: MessageRepository + ?Sized + 'static,
    Mem: MembershipRepository + ?Sized + 'static,
{
    async fn send(&self, sender_id: i64, request: SendMessageDto) -> Result<Message, MessageError> {
        self.ensure_member(request.chat_id, sender_id).await?;

        // Media messages may go without a caption.
        let has_payload = request.payload.is_some();
        validate_content(&request.content, has_payload)?;
        if request.message_type.requires_payload() && !has_payload {
            return Err(MessageError::Validation(format!(
                "A {} message requires a payload",
                request.message_type
            )));
        }

        if let Some(reply_to) = request.reply_to {
            let parent = self
                .message_repo
                .find_by_id(reply_to)
                .await
                .map_err(|e| persistence("message_lookup", e))?;
            if parent.map(|p| p.chat_id) != Some(request.chat_id) {
                return Err(MessageError::Validation(
                    "Replied message does not belong to this chat".into(),
                ));
            }
        }

        let message = Message {
            id: self.id_generator.generate(),
            chat_id: request.chat_id,
            sender_id,
            message_type: request.message_type,
            content: request.content,
            payload: request.payload,
            reply_to_id: request.reply_to,
            created_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
        };

        let saved = self
            .message_repo
            .create(&message)
            .await
            .map_err(|e| persistence("message_create", e))?;

        tracing::debug!(
            message_id = saved.id,
            chat_id = saved.chat_id,
            sender_id,
            "Message persisted"
        );

        self.publisher.publish(
            Audience::chat(saved.chat_id),
            RealtimeEvent::MessageNew(MessagePayload::from(&saved)),
        );

        Ok(saved)
    }

    async fn edit(&self, message_id: i64, actor_id: i64, content: String) -> Result<Message, MessageError> {
        let message = self.find_own(message_id, actor_id).await?;
        if message.is_deleted() {
            return Err(MessageError::NotFound);
        }
        validate_content(&content, message.payload.is_some())?;

        let updated = self
            .message_repo
            .update_content(message_id, &content, Utc::now())
            .await
            .map_err(|e| match e {
                // Deleted between the ownership check and the update
                AppError::NotFound(_) => MessageError::NotFound,
                e => persistence("message_update", e),
            })?;

        self.publisher.publish(
            Audience::chat(updated.chat_id),
            RealtimeEvent::MessageUpdated(MessageChangePayload {
                id: updated.id,
                chat_id: updated.chat_id,
                content: Some(updated.content.clone()),
                updated_at: updated.updated_at(),
            }),
        );

        Ok(updated)
    }

    async fn delete(&self, message_id: i64, actor_id: i64) -> Result<(), MessageError> {
        let message = self.find_own(message_id, actor_id).await?;
        if message.is_deleted() {
            return Ok(());
        }

        let deleted = self
            .message_repo
            .soft_delete(message_id, Utc::now())
            .await
            .map_err(|e| persistence("message_delete", e))?;

        self.publisher.publish(
            Audience::chat(deleted.chat_id),
            RealtimeEvent::MessageDeleted(MessageChangePayload {
                id: deleted.id,
                chat_id: deleted.chat_id,
                content: None,
                updated_at: deleted.updated_at(),
            }),
        );

        Ok(())
    }

    async fn history(
        &self,
        chat_id: i64,
        viewer_id: i64,
        before: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<MessageView>, MessageError> {
        self.ensure_member(chat_id, viewer_id).await?;

        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        self.message_repo
            .find_page(chat_id, viewer_id, before, limit)
            .await
            .map_err(|e| persistence("message_history", e))
    }
}
