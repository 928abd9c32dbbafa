//! Chat membership lookups.
//!
//! Rooms are rehydrated from `chat_members` on every connect, so this trait
//! is on the handshake path and on every authorization check.

use async_trait::async_trait;

use crate::shared::error::AppError;

/// Repository trait for `chat_members`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Every chat the user belongs to.
    async fn chat_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, AppError>;

    async fn is_member(&self, chat_id: i64, user_id: i64) -> Result<bool, AppError>;

    /// Every member of a chat.
    async fn member_ids(&self, chat_id: i64) -> Result<Vec<i64>, AppError>;
}
