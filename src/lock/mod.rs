//! Distributed exclusivity lock scoped to a watchdog name.
//!
//! Only one watchdog per scope may run its monitor loop at a time. Locks are
//! acquired without waiting and always carry a TTL, so a crashed holder cannot
//! block the fleet forever.
//!
//! Release follows a best-effort contract: [`release_quietly`] is the one place
//! cleanup happens and it never fails, whatever state the lock is in.

pub mod local;
pub mod redis_lock;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

pub use local::LocalLock;
pub use redis_lock::RedisLock;

/// Errors that can occur during lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another instance holds the lock.
    #[error("Lock '{0}' is held by another instance")]
    Unavailable(String),

    /// Failed to connect to the lock backend.
    #[error("Lock backend connection failed: {0}")]
    ConnectionFailed(String),

    /// A Redis operation failed.
    #[error("Lock backend operation failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Proof of a held lock, valid only for the instance that acquired it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    name: String,
    token: String,
}

impl LockHandle {
    /// Creates a handle for `name` identified by a holder-unique `token`.
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }

    /// Generates a handle with a fresh random token.
    pub fn generate(name: impl Into<String>) -> Self {
        Self::new(name, uuid::Uuid::new_v4().to_string())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Named, non-blocking mutual exclusion.
#[async_trait]
pub trait ExclusivityLock: Send + Sync {
    /// Tries to take the lock once.
    ///
    /// # Errors
    ///
    /// Returns `LockError::Unavailable` when another holder has it.
    async fn acquire(&self, name: &str) -> Result<LockHandle, LockError>;

    /// Releases the lock if `handle` still owns it. Releasing twice, or after
    /// the TTL expired, is a no-op.
    async fn release(&self, handle: &LockHandle) -> Result<(), LockError>;
}

/// Releases `handle`, ignoring every failure.
///
/// This is the allowed-failure contract for cleanup: the lock may have
/// expired, been released already, or the backend may be unreachable. None of
/// these may mask the reason the caller is cleaning up, so they are logged and
/// dropped. The TTL reclaims anything left behind.
pub async fn release_quietly(lock: &dyn ExclusivityLock, handle: &LockHandle) {
    match lock.release(handle).await {
        Ok(()) => info!(lock = %handle.name(), "Lock released"),
        Err(e) => debug!(lock = %handle.name(), error = %e, "Ignoring lock release failure"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenLock;

    #[async_trait]
    impl ExclusivityLock for BrokenLock {
        async fn acquire(&self, name: &str) -> Result<LockHandle, LockError> {
            Err(LockError::Unavailable(name.to_string()))
        }

        async fn release(&self, _handle: &LockHandle) -> Result<(), LockError> {
            Err(LockError::ConnectionFailed("backend down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_release_quietly_swallows_errors() {
        let handle = LockHandle::generate("fleet");
        // Must return normally even though the backend fails.
        release_quietly(&BrokenLock, &handle).await;
    }

    #[tokio::test]
    async fn test_release_quietly_on_never_held_lock() {
        let lock = LocalLock::new(std::time::Duration::from_secs(60));
        let handle = LockHandle::generate("never-acquired");
        release_quietly(&lock, &handle).await;
        release_quietly(&lock, &handle).await;
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = LockHandle::generate("fleet");
        let b = LockHandle::generate("fleet");
        assert_eq!(a.name(), "fleet");
        assert_ne!(a.token(), b.token());
    }

    #[test]
    fn test_lock_error_display() {
        let err = LockError::Unavailable("fleet".to_string());
        assert!(err.to_string().contains("fleet"));
        assert!(err.to_string().contains("another instance"));
    }
}
