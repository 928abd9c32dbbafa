//! Live connection counters.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::keys;
use crate::domain::PresenceCounter;
use crate::shared::error::AppError;

/// In-process counter for single-process mode.
#[derive(Debug, Default)]
pub struct LocalPresenceCounter {
    counts: DashMap<i64, u64>,
}

impl LocalPresenceCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceCounter for LocalPresenceCounter {
    async fn increment(&self, user_id: i64) -> Result<u64, AppError> {
        let mut count = self.counts.entry(user_id).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn decrement(&self, user_id: i64) -> Result<u64, AppError> {
        match self.counts.entry(user_id) {
            Entry::Occupied(mut entry) => {
                let next = entry.get().saturating_sub(1);
                if next == 0 {
                    entry.remove();
                } else {
                    *entry.get_mut() = next;
                }
                Ok(next)
            }
            Entry::Vacant(_) => Ok(0),
        }
    }

    async fn count(&self, user_id: i64) -> Result<u64, AppError> {
        Ok(self.counts.get(&user_id).map(|c| *c).unwrap_or(0))
    }
}

/// Decrement and clamp atomically, so an `INCR` landing between the two
/// steps is never erased.
const DECREMENT_SCRIPT: &str = r#"
local n = redis.call('DECR', KEYS[1])
if n <= 0 then
    redis.call('DEL', KEYS[1])
    return 0
end
return n
"#;

static DECREMENT: Lazy<Script> = Lazy::new(|| Script::new(DECREMENT_SCRIPT));

/// Counts below zero come from crashed instances and read as zero.
fn clamp_count(raw: i64) -> u64 {
    raw.max(0) as u64
}

/// Counter shared by every instance through Redis `INCR`/`DECR`.
#[derive(Clone)]
pub struct RedisPresenceCounter {
    conn: ConnectionManager,
}

impl RedisPresenceCounter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl PresenceCounter for RedisPresenceCounter {
    async fn increment(&self, user_id: i64) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.incr(keys::presence_count(user_id), 1).await?;
        Ok(clamp_count(count))
    }

    async fn decrement(&self, user_id: i64) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let count: i64 = DECREMENT
            .key(keys::presence_count(user_id))
            .invoke_async(&mut conn)
            .await?;
        Ok(clamp_count(count))
    }

    async fn count(&self, user_id: i64) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let count: Option<i64> = conn.get(keys::presence_count(user_id)).await?;
        Ok(clamp_count(count.unwrap_or(0)))
    }
}
