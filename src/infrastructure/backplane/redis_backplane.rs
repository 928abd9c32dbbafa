//! Redis pub/sub backplane.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::{Backplane, BackplaneError, BackplaneMode};

/// Publishes through a shared connection manager; every subscription opens
/// its own dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisBackplane {
    client: Client,
    conn: ConnectionManager,
}

impl RedisBackplane {
    pub fn new(client: Client, conn: ConnectionManager) -> Self {
        Self { client, conn }
    }
}

#[async_trait]
impl Backplane for RedisBackplane {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BackplaneError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, BackplaneError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping non-text backplane payload");
                        None
                    }
                }
            })
            .boxed();

        Ok(stream)
    }

    fn mode(&self) -> BackplaneMode {
        BackplaneMode::Redis
    }
}
