//! In-process lock used when the lock locator is `disabled`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{ExclusivityLock, LockError, LockHandle};

struct Holder {
    token: String,
    expires_at: Instant,
}

/// Lock table living in the current process, with the same TTL semantics as
/// the distributed lock.
pub struct LocalLock {
    ttl: Duration,
    holders: Mutex<HashMap<String, Holder>>,
}

impl LocalLock {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            holders: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ExclusivityLock for LocalLock {
    async fn acquire(&self, name: &str) -> Result<LockHandle, LockError> {
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if let Some(holder) = holders.get(name) {
            if holder.expires_at > now {
                return Err(LockError::Unavailable(name.to_string()));
            }
        }

        let handle = LockHandle::generate(name);
        holders.insert(
            name.to_string(),
            Holder {
                token: handle.token().to_string(),
                expires_at: now + self.ttl,
            },
        );
        Ok(handle)
    }

    async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        let mut holders = self.holders.lock().unwrap_or_else(|e| e.into_inner());
        if holders
            .get(handle.name())
            .is_some_and(|holder| holder.token == handle.token())
        {
            holders.remove(handle.name());
        }
        Ok(())
    }
}
