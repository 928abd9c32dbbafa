//! Message Repository Implementation
//!
//! PostgreSQL implementation of message storage with keyset pagination and
//! per-viewer delivery status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{DeliveryStatus, Message, MessageRepository, MessageType, MessageView};
use crate::shared::error::AppError;

/// PostgreSQL message repository implementation.
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    /// Creates a new PgMessageRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, message_type, content, payload, \
                               reply_to_id, created_at, edited_at, deleted_at";

/// Internal row type for message queries.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    chat_id: i64,
    sender_id: i64,
    message_type: String,
    content: String,
    payload: Option<serde_json::Value>,
    reply_to_id: Option<i64>,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    /// Converts database row to domain Message entity.
    fn into_message(self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            message_type: MessageType::from_str(&self.message_type),
            content: self.content,
            payload: self.payload,
            reply_to_id: self.reply_to_id,
            created_at: self.created_at,
            edited_at: self.edited_at,
            deleted_at: self.deleted_at,
        }
    }
}

/// Message row joined with the viewer's delivery status rank.
#[derive(Debug, sqlx::FromRow)]
struct MessageViewRow {
    #[sqlx(flatten)]
    message: MessageRow,
    viewer_status: Option<i16>,
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    /// Insert the message and a `sent` delivery row for every other member
    /// in one transaction.
    async fn create(&self, message: &Message) -> Result<Message, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, message_type, content, payload, reply_to_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(message.id)
        .bind(message.chat_id)
        .bind(message.sender_id)
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(&message.payload)
        .bind(message.reply_to_id)
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO message_deliveries (message_id, user_id, status)
            SELECT $1, user_id, 0
            FROM chat_members
            WHERE chat_id = $2 AND user_id <> $3
            "#,
        )
        .bind(message.id)
        .bind(message.chat_id)
        .bind(message.sender_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_message())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Message>, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_message()))
    }

    /// Newest first. The sender sees the least advanced recipient status;
    /// a recipient sees their own.
    async fn find_page(
        &self,
        chat_id: i64,
        viewer_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<MessageView>, AppError> {
        let rows = sqlx::query_as::<_, MessageViewRow>(
            r#"
            SELECT m.id, m.chat_id, m.sender_id, m.message_type, m.content, m.payload,
                   m.reply_to_id, m.created_at, m.edited_at, m.deleted_at,
                   CASE
                       WHEN m.sender_id = $2 THEN
                           (SELECT MIN(d.status) FROM message_deliveries d WHERE d.message_id = m.id)
                       ELSE
                           (SELECT d.status FROM message_deliveries d
                            WHERE d.message_id = m.id AND d.user_id = $2)
                   END AS viewer_status
            FROM messages m
            WHERE m.chat_id = $1
              AND ($3::BIGINT IS NULL OR m.id < $3)
            ORDER BY m.id DESC
            LIMIT $4
            "#,
        )
        .bind(chat_id)
        .bind(viewer_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| MessageView {
                status: r.viewer_status.and_then(DeliveryStatus::from_rank),
                message: r.message.into_message(),
            })
            .collect())
    }

    async fn update_content(
        &self,
        id: i64,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Message, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            UPDATE messages
            SET content = $2, edited_at = $3
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(content)
        .bind(edited_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".into()))?;

        Ok(row.into_message())
    }

    async fn soft_delete(&self, id: i64, deleted_at: DateTime<Utc>) -> Result<Message, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            UPDATE messages
            SET deleted_at = COALESCE(deleted_at, $2)
            WHERE id = $1
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(deleted_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".into()))?;

        Ok(row.into_message())
    }
}
