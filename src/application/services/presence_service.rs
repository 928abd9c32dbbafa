//! Presence Service
//!
//! Online/offline is derived from the live connection count: a user becomes
//! online on the 0 -> 1 transition and offline on 1 -> 0. Only transitions
//! are persisted and broadcast.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    Audience, EventPublisher, Except, Presence, PresenceCounter, PresencePayload,
    PresenceRepository, RealtimeEvent,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

pub struct PresenceService<P>
where
    P: PresenceRepository + ?Sized,
{
    counter: Arc<dyn PresenceCounter>,
    presence_repo: Arc<P>,
    publisher: Arc<dyn EventPublisher>,
}

impl<P> PresenceService<P>
where
    P: PresenceRepository + ?Sized,
{
    pub fn new(
        counter: Arc<dyn PresenceCounter>,
        presence_repo: Arc<P>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            counter,
            presence_repo,
            publisher,
        }
    }

    /// Record a new connection. Returns true when the user just came online.
    pub async fn connected(&self, user_id: i64, chat_ids: &[i64]) -> Result<bool, AppError> {
        let count = self.counter.increment(user_id).await?;
        if count != 1 {
            return Ok(false);
        }

        if let Err(e) = self.presence_repo.mark_online(user_id).await {
            metrics::record_persistence_failure("presence_online");
            tracing::warn!(user_id, error = %e, "Failed to persist online state");
        }

        tracing::debug!(user_id, "User online");
        self.broadcast(user_id, true, None, chat_ids);
        Ok(true)
    }

    /// Record a closed connection. Returns true when the user just went
    /// offline.
    pub async fn disconnected(&self, user_id: i64, chat_ids: &[i64]) -> Result<bool, AppError> {
        let count = self.counter.decrement(user_id).await?;
        if count != 0 {
            return Ok(false);
        }

        let last_seen_at = Utc::now();
        if let Err(e) = self.presence_repo.mark_offline(user_id, last_seen_at).await {
            metrics::record_persistence_failure("presence_offline");
            tracing::warn!(user_id, error = %e, "Failed to persist offline state");
        }

        tracing::debug!(user_id, "User offline");
        self.broadcast(user_id, false, Some(last_seen_at), chat_ids);
        Ok(true)
    }

    pub async fn is_online(&self, user_id: i64) -> Result<bool, AppError> {
        Ok(self.counter.count(user_id).await? > 0)
    }

    /// Current presence: the live counter decides `isOnline`, storage
    /// supplies `lastSeenAt`.
    pub async fn get(&self, user_id: i64) -> Result<Presence, AppError> {
        let online = self.is_online(user_id).await?;
        let stored = self
            .presence_repo
            .find(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        Ok(Presence {
            user_id,
            is_online: online,
            last_seen_at: stored.last_seen_at,
        })
    }

    fn broadcast(
        &self,
        user_id: i64,
        is_online: bool,
        last_seen_at: Option<chrono::DateTime<Utc>>,
        chat_ids: &[i64],
    ) {
        if chat_ids.is_empty() {
            return;
        }
        self.publisher.publish(
            Audience::Chats {
                chat_ids: chat_ids.to_vec(),
                except: Except::User(user_id),
            },
            RealtimeEvent::PresenceChanged(PresencePayload {
                user_id,
                is_online,
                last_seen_at,
            }),
        );
    }
}
