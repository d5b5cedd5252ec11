//! Redis lock with token ownership and automatic expiry.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::{ExclusivityLock, LockError, LockHandle};

/// Deletes the key only while it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Distributed lock stored as a single Redis key.
///
/// Acquisition is `SET name token NX PX ttl`; release is a compare-and-delete
/// script so a holder whose TTL lapsed cannot free a successor's lock.
#[derive(Clone)]
pub struct RedisLock {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Auto-expiry of a held lock.
    ttl: Duration,
}

impl RedisLock {
    /// Connects to the lock backend.
    ///
    /// # Errors
    ///
    /// Returns `LockError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| LockError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis, ttl })
    }

    /// Creates a lock from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, ttl: Duration) -> Self {
        Self { redis, ttl }
    }
}

#[async_trait]
impl ExclusivityLock for RedisLock {
    async fn acquire(&self, name: &str) -> Result<LockHandle, LockError> {
        let mut conn = self.redis.clone();
        let handle = LockHandle::generate(name);

        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(handle.token())
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => {
                debug!(lock = %name, ttl_secs = self.ttl.as_secs(), "Lock acquired");
                Ok(handle)
            }
            None => Err(LockError::Unavailable(name.to_string())),
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        let mut conn = self.redis.clone();
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(handle.name())
            .arg(handle.token())
            .invoke_async(&mut conn)
            .await?;

        if removed == 0 {
            debug!(lock = %handle.name(), "Lock was no longer held by this handle");
        }
        Ok(())
    }
}
