//! Typing Service
//!
//! Relays typing indicators to a chat room minus the typist's own
//! connections. Indicators are never persisted; a per-(chat, user) registry
//! lets the server emit `typing:stop` when an indicator expires or the
//! typist's last connection closes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::domain::{Audience, EventPublisher, RealtimeEvent, TypingPayload};

pub struct TypingService {
    /// (chat_id, user_id) -> expiry
    entries: DashMap<(i64, i64), Instant>,
    ttl: Duration,
    publisher: Arc<dyn EventPublisher>,
}

impl TypingService {
    pub fn new(ttl: Duration, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            publisher,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start (or refresh) an indicator. Every call is relayed so clients
    /// can extend their local timers.
    pub fn start(&self, chat_id: i64, user_id: i64) {
        self.entries.insert((chat_id, user_id), Instant::now() + self.ttl);
        self.publisher.publish(
            Audience::chat_except_user(chat_id, user_id),
            RealtimeEvent::TypingStart(TypingPayload {
                chat_id,
                user_id,
                expires_in_ms: Some(self.ttl.as_millis() as u64),
            }),
        );
    }

    /// Stop an indicator. Relayed even when no entry exists, so a client
    /// that missed the start still converges.
    pub fn stop(&self, chat_id: i64, user_id: i64) {
        self.entries.remove(&(chat_id, user_id));
        self.emit_stop(chat_id, user_id);
    }

    /// Drop every indicator of a user that just went offline.
    pub fn clear_user(&self, user_id: i64) -> usize {
        let chats: Vec<i64> = self
            .entries
            .iter()
            .filter(|entry| entry.key().1 == user_id)
            .map(|entry| entry.key().0)
            .collect();

        let mut cleared = 0;
        for chat_id in chats {
            if self.entries.remove(&(chat_id, user_id)).is_some() {
                self.emit_stop(chat_id, user_id);
                cleared += 1;
            }
        }
        cleared
    }

    /// Expire indicators whose TTL has passed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub(crate) fn sweep_expired_at(&self, now: Instant) -> usize {
        let expired: Vec<(i64, i64)> = self
            .entries
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut swept = 0;
        for key in expired {
            // A refresh may have landed between the scan and the removal.
            if self.entries.remove_if(&key, |_, expiry| *expiry <= now).is_some() {
                self.emit_stop(key.0, key.1);
                swept += 1;
            }
        }
        swept
    }

    pub fn is_typing(&self, chat_id: i64, user_id: i64) -> bool {
        self.entries
            .get(&(chat_id, user_id))
            .map(|expiry| *expiry > Instant::now())
            .unwrap_or(false)
    }

    fn emit_stop(&self, chat_id: i64, user_id: i64) {
        self.publisher.publish(
            Audience::chat_except_user(chat_id, user_id),
            RealtimeEvent::TypingStop(TypingPayload {
                chat_id,
                user_id,
                expires_in_ms: None,
            }),
        );
    }
}
