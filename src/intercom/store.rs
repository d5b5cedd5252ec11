//! The shared key/value contract used for progress counters.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

/// Errors that can occur during counter store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the store.
    #[error("Counter store connection failed: {0}")]
    ConnectionFailed(String),

    /// A Redis operation failed.
    #[error("Counter store operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// The key holds something that is not an integer counter.
    #[error("Key '{key}' does not hold an integer: {value}")]
    NotAnInteger { key: String, value: String },
}

/// Shared, cross-process store for counters and worker registrations.
///
/// Every watchdog and worker of a fleet talks to the same store. `incr` must
/// be atomic: concurrent workers increment the same counters and a
/// read-modify-write would lose updates.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Returns the integer at `key`, or `0` if absent.
    async fn get(&self, key: &str) -> Result<i64, StoreError>;

    /// Overwrites `key` with `value`.
    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError>;

    /// Atomically adds `delta` to `key` (absent counts as `0`) and returns the
    /// new value.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Stores an arbitrary value that expires after `ttl`.
    async fn put_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Removes `key`. Returns whether an entry was actually removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Counts the live keys starting with `prefix`.
    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store used when the intercom locator is `disabled`.
///
/// Only coordinates tasks of the same process; workers running elsewhere
/// cannot see it.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, MemoryEntry>) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_live(now));
        f(&mut entries)
    }
}

fn parse_counter(key: &str, value: &str) -> Result<i64, StoreError> {
    value.parse().map_err(|_| StoreError::NotAnInteger {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<i64, StoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(entry) => parse_counter(key, &entry.value),
            None => Ok(0),
        })
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    expires_at: None,
                },
            );
        });
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.with_entries(|entries| {
            let current = match entries.get(key) {
                Some(entry) => parse_counter(key, &entry.value)?,
                None => 0,
            };
            let next = current + delta;
            let expires_at = entries.get(key).and_then(|entry| entry.expires_at);
            entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: next.to_string(),
                    expires_at,
                },
            );
            Ok(next)
        })
    }

    async fn put_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_string(),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.with_entries(|entries| entries.remove(key).is_some()))
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        Ok(self.with_entries(|entries| {
            entries.keys().filter(|key| key.starts_with(prefix)).count() as u64
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_absent_key_reads_zero() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("missing").await.unwrap(), 0);
        assert!(!store.delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_get_incr() {
        let store = MemoryCounterStore::new();
        store.set("w:workers_started", 4).await.unwrap();
        assert_eq!(store.get("w:workers_started").await.unwrap(), 4);
        assert_eq!(store.incr("w:workers_started", 2).await.unwrap(), 6);
        assert_eq!(store.incr("w:fresh", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryCounterStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.incr("counter", 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("counter").await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_non_integer_value_is_reported() {
        let store = MemoryCounterStore::new();
        store
            .put_ex("w:worker:1", "busy", Duration::from_secs(60))
            .await
            .unwrap();
        let err = store.get("w:worker:1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotAnInteger { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiring_entries_and_prefix_count() {
        let store = MemoryCounterStore::new();
        store
            .put_ex("w:worker:a", "1", Duration::from_secs(10))
            .await
            .unwrap();
        store
            .put_ex("w:worker:b", "1", Duration::from_secs(30))
            .await
            .unwrap();
        store.set("w:workers_started", 2).await.unwrap();

        assert_eq!(store.count_prefix("w:worker:").await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.count_prefix("w:worker:").await.unwrap(), 1);
        assert!(!store.delete("w:worker:a").await.unwrap());
        assert!(store.delete("w:worker:b").await.unwrap());
        assert_eq!(store.count_prefix("w:worker:").await.unwrap(), 0);
    }
}
