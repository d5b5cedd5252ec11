//! Queue depth observation.
//!
//! The watchdog only needs one thing from the message broker: how many tasks
//! are waiting on a named queue. Providers must perform a passive check, so a
//! queue that does not exist yet reports `0` and is never created as a side
//! effect of being observed.
//!
//! - **RedisQueueDepth**: Redis-list broker (the Celery Redis transport layout)
//! - **DisabledQueue**: stand-in for the `disabled` locator, always empty

pub mod redis_list;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub use redis_list::RedisQueueDepth;

/// Errors that can occur while querying the broker.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to the broker.
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    /// A broker operation failed.
    #[error("Broker operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// The key exists but does not hold a queue.
    #[error("Key '{queue}' holds a {kind}, not a queue")]
    UnexpectedType { queue: String, kind: String },
}

/// Reports the number of pending tasks on a queue.
#[async_trait]
pub trait QueueDepthProvider: Send + Sync {
    /// Returns the current depth of `queue`, or `0` if it does not exist.
    ///
    /// Transport failures are returned as-is; providers do not retry.
    async fn depth(&self, queue: &str) -> Result<u64, QueueError>;
}

/// Provider used when the queue locator is `disabled`.
#[derive(Debug, Clone, Default)]
pub struct DisabledQueue;

#[async_trait]
impl QueueDepthProvider for DisabledQueue {
    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        warn!(queue = %queue, "Watchdog is watching a disabled queue. Fix it!");
        Ok(0)
    }
}

/// Sums the depth of every queue in `queues`.
pub async fn total_depth(
    provider: &dyn QueueDepthProvider,
    queues: &[String],
) -> Result<u64, QueueError> {
    let mut total = 0u64;
    for queue in queues {
        total = total.saturating_add(provider.depth(queue).await?);
    }
    Ok(total)
}
