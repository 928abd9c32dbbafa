//! Delivery Repository Implementation
//!
//! Monotonic status updates on `message_deliveries`. The `status < $new`
//! predicate makes concurrent or reordered reports safe: the row only ever
//! moves forward, whichever report lands first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{AdvanceOutcome, DeliveryRecord, DeliveryRepository, DeliveryStatus};
use crate::shared::error::AppError;

pub struct PgDeliveryRepository {
    pool: PgPool,
}

impl PgDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    message_id: i64,
    chat_id: i64,
    user_id: i64,
    status: i16,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
}

impl DeliveryRow {
    fn into_record(self) -> DeliveryRecord {
        DeliveryRecord {
            message_id: self.message_id,
            chat_id: self.chat_id,
            user_id: self.user_id,
            status: DeliveryStatus::from_rank(self.status).unwrap_or(DeliveryStatus::Sent),
            delivered_at: self.delivered_at,
            read_at: self.read_at,
        }
    }
}

#[async_trait]
impl DeliveryRepository for PgDeliveryRepository {
    async fn advance(
        &self,
        message_id: i64,
        user_id: i64,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, AppError> {
        // Any forward move implies delivery, so delivered_at is always
        // stamped; read_at only on a read report.
        let advanced = sqlx::query_as::<_, DeliveryRow>(
            r#"
            UPDATE message_deliveries d
            SET status = $3,
                delivered_at = COALESCE(d.delivered_at, $4),
                read_at = CASE WHEN $3 = 2 THEN COALESCE(d.read_at, $4) ELSE d.read_at END
            FROM messages m
            WHERE d.message_id = $1
              AND d.user_id = $2
              AND d.status < $3
              AND m.id = d.message_id
            RETURNING d.message_id, m.chat_id, d.user_id, d.status, d.delivered_at, d.read_at
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(status.rank())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = advanced {
            return Ok(AdvanceOutcome::Advanced(row.into_record()));
        }

        Ok(match self.find(message_id, user_id).await? {
            Some(record) => AdvanceOutcome::Unchanged(record),
            None => AdvanceOutcome::NotRecipient,
        })
    }

    async fn find(&self, message_id: i64, user_id: i64) -> Result<Option<DeliveryRecord>, AppError> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT d.message_id, m.chat_id, d.user_id, d.status, d.delivered_at, d.read_at
            FROM message_deliveries d
            JOIN messages m ON m.id = d.message_id
            WHERE d.message_id = $1 AND d.user_id = $2
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_record()))
    }
}
