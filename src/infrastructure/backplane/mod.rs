//! Backplane Module
//!
//! Cross-instance fan-out and shared presence counting.
//!
//! ```text
//! +-----------+   envelope    +---------------+   envelope    +-----------+
//! | Gateway A | ----------->  | Redis pub/sub | ------------> | Gateway B |
//! +-----------+  (forwarder)  +---------------+  (subscriber) +-----------+
//! ```
//!
//! Every instance publishes the frames it emits to one shared channel and
//! delivers the frames it receives from other instances to its own local
//! connections. When Redis is disabled or unreachable at startup the
//! gateway runs without a backplane and with an in-process presence counter.

mod forwarder;
mod presence_counter;
mod redis_backplane;

pub use forwarder::BackplaneForwarder;
pub use presence_counter::{LocalPresenceCounter, RedisPresenceCounter};
pub use redis_backplane::RedisBackplane;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use redis::aio::ConnectionManager;
use redis::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::RedisSettings;
use crate::domain::Audience;

/// Backplane errors
#[derive(Debug, thiserror::Error)]
pub enum BackplaneError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Timed out connecting to Redis after {0:?}")]
    Timeout(Duration),

    #[error("Invalid envelope: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// How this instance reaches its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackplaneMode {
    Redis,
    SingleProcess,
}

impl BackplaneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::SingleProcess => "single_process",
        }
    }
}

/// Publish/subscribe transport between gateway instances.
#[async_trait]
pub trait Backplane: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BackplaneError>;

    /// Stream of payloads published on `channel` by any instance. The
    /// stream ends when the underlying connection drops.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BackplaneError>;

    fn mode(&self) -> BackplaneMode;
}

/// One emitted event as it travels between instances.
///
/// `frame` is the already-encoded client frame, so receiving instances
/// deliver it without re-serializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackplaneEnvelope {
    /// Node id of the emitting instance; instances skip their own envelopes.
    pub origin: Uuid,
    pub audience: Audience,
    pub event: String,
    pub frame: String,
}

impl BackplaneEnvelope {
    pub fn encode(&self) -> Result<String, BackplaneError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self, BackplaneError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Creates a Redis connection manager, giving up after the configured
/// connect timeout.
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<(Client, ConnectionManager), BackplaneError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    let timeout = Duration::from_secs(settings.connect_timeout_secs.max(1));
    let manager = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
        .await
        .map_err(|_| BackplaneError::Timeout(timeout))??;
    info!("Redis connection established");
    Ok((client, manager))
}

/// Redis key helpers.
pub mod keys {
    /// Prefix for per-user live connection counters
    pub const PRESENCE_COUNT: &str = "presence:connections:";

    #[inline]
    pub fn presence_count(user_id: impl std::fmt::Display) -> String {
        format!("{}{}", PRESENCE_COUNT, user_id)
    }
}
