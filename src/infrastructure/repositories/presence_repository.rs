//! Presence Repository Implementation
//!
//! Persists online state on the `users` row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Presence, PresenceRepository};
use crate::shared::error::AppError;

pub struct PgPresenceRepository {
    pool: PgPool,
}

impl PgPresenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PresenceRow {
    id: i64,
    is_online: bool,
    last_seen_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl PresenceRepository for PgPresenceRepository {
    async fn mark_online(&self, user_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET is_online = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_offline(&self, user_id: i64, last_seen_at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET is_online = FALSE, last_seen_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(last_seen_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find(&self, user_id: i64) -> Result<Option<Presence>, AppError> {
        let row = sqlx::query_as::<_, PresenceRow>(
            "SELECT id, is_online, last_seen_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Presence {
            user_id: r.id,
            is_online: r.is_online,
            last_seen_at: r.last_seen_at,
        }))
    }
}
