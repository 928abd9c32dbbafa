//! Call Repository Implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{CallLog, CallRepository};
use crate::shared::error::AppError;

pub struct PgCallRepository {
    pool: PgPool,
}

impl PgCallRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CallLogRow {
    id: i64,
    chat_id: i64,
    caller_id: i64,
    callee_id: i64,
    video: bool,
    duration_secs: i32,
    ended_at: DateTime<Utc>,
}

impl From<CallLogRow> for CallLog {
    fn from(row: CallLogRow) -> Self {
        Self {
            id: row.id,
            chat_id: row.chat_id,
            caller_id: row.caller_id,
            callee_id: row.callee_id,
            video: row.video,
            duration_secs: row.duration_secs,
            ended_at: row.ended_at,
        }
    }
}

#[async_trait]
impl CallRepository for PgCallRepository {
    async fn record(&self, log: &CallLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO call_logs (id, chat_id, caller_id, callee_id, video, duration_secs, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(log.chat_id)
        .bind(log.caller_id)
        .bind(log.callee_id)
        .bind(log.video)
        .bind(log.duration_secs)
        .bind(log.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_chat(&self, chat_id: i64, limit: i64) -> Result<Vec<CallLog>, AppError> {
        let rows = sqlx::query_as::<_, CallLogRow>(
            r#"
            SELECT id, chat_id, caller_id, callee_id, video, duration_secs, ended_at
            FROM call_logs
            WHERE chat_id = $1
            ORDER BY ended_at DESC
            LIMIT $2
            "#,
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CallLog::from).collect())
    }
}
