//! Redis-backed counter store shared by the whole fleet.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::store::{CounterStore, StoreError};

/// Counter store backed by Redis.
///
/// Increments use `INCRBY`, so concurrent workers never lose updates.
#[derive(Clone)]
pub struct RedisCounterStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisCounterStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Creates a store from an existing ConnectionManager.
    ///
    /// Useful when the lock and the counters live on the same server.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(value) => value.parse().map_err(|_| StoreError::NotAnInteger {
                key: key.to_string(),
                value,
            }),
            None => Ok(0),
        }
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.redis.clone();
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn put_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", escape_glob(prefix));

        let mut count = 0u64;
        let mut keys = conn.scan_match::<_, String>(pattern).await?;
        while let Some(_key) = keys.next_item().await {
            count += 1;
        }
        Ok(count)
    }
}

/// Escapes the characters `SCAN MATCH` treats as glob syntax.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("fleet:worker:"), "fleet:worker:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
