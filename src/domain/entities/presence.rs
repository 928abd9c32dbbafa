//! Presence entity, persistence and the live connection counter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Persisted presence of a user.
///
/// Maps to `users.is_online` / `users.last_seen_at`. `last_seen_at` is
/// stamped when the last connection closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: i64,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Presence {
    pub fn offline(user_id: i64) -> Self {
        Self {
            user_id,
            is_online: false,
            last_seen_at: None,
        }
    }
}

/// Repository trait for persisted presence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceRepository: Send + Sync {
    async fn mark_online(&self, user_id: i64) -> Result<(), AppError>;

    async fn mark_offline(&self, user_id: i64, last_seen_at: DateTime<Utc>) -> Result<(), AppError>;

    async fn find(&self, user_id: i64) -> Result<Option<Presence>, AppError>;
}

/// Count of live connections per user, shared by every gateway instance.
///
/// `increment` / `decrement` return the count after the change; presence
/// flips online on a 0 -> 1 transition and offline on 1 -> 0.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceCounter: Send + Sync {
    async fn increment(&self, user_id: i64) -> Result<u64, AppError>;

    async fn decrement(&self, user_id: i64) -> Result<u64, AppError>;

    async fn count(&self, user_id: i64) -> Result<u64, AppError>;
}
