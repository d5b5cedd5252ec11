//! Queue depth for brokers that keep each queue in a Redis list.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::{QueueDepthProvider, QueueError};

/// Reads queue depths from a Redis broker.
///
/// The existence check is `TYPE`, which never creates the key: an absent
/// queue is reported as empty and only a list is measured with `LLEN`.
#[derive(Clone)]
pub struct RedisQueueDepth {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisQueueDepth {
    /// Connects to the broker.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(broker_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(broker_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Creates a provider from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl QueueDepthProvider for RedisQueueDepth {
    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();

        let kind: String = redis::cmd("TYPE").arg(queue).query_async(&mut conn).await?;
        match kind.as_str() {
            "none" => {
                debug!(queue = %queue, "Queue has not been created yet");
                Ok(0)
            }
            "list" => {
                let len: u64 = conn.llen(queue).await?;
                Ok(len)
            }
            _ => Err(QueueError::UnexpectedType {
                queue: queue.to_string(),
                kind,
            }),
        }
    }
}
