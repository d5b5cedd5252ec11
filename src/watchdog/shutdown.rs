//! Explicit shutdown requests.
//!
//! An operator stops a running watchdog by setting a flag; the loop checks it
//! at every iteration boundary and exits without requesting a successor. The
//! in-process [`ShutdownFlag`] can also be awaited, so it cuts waits short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::info;

use crate::intercom::{CounterStore, StoreError};

/// Source of shutdown requests.
#[async_trait]
pub trait ShutdownSignal: Send + Sync {
    async fn is_requested(&self) -> Result<bool, StoreError>;
}

/// Never requests a shutdown.
#[derive(Debug, Clone, Default)]
pub struct NeverShutdown;

#[async_trait]
impl ShutdownSignal for NeverShutdown {
    async fn is_requested(&self) -> Result<bool, StoreError> {
        Ok(false)
    }
}

#[derive(Debug, Default)]
struct FlagState {
    requested: AtomicBool,
    notify: Notify,
}

/// In-process flag, e.g. flipped by a Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    state: Arc<FlagState>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every [`requested`](Self::requested) waiter.
    pub fn request(&self) {
        self.state.requested.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set.
    pub async fn requested(&self) {
        loop {
            // Register before reading the flag so a concurrent request is not missed.
            let notified = self.state.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ShutdownSignal for ShutdownFlag {
    async fn is_requested(&self) -> Result<bool, StoreError> {
        Ok(self.is_set())
    }
}

/// Flag stored in the shared counter store, visible to the whole fleet.
///
/// Any non-zero value under `key` means "shut down".
#[derive(Clone)]
pub struct StoreShutdownSignal {
    store: Arc<dyn CounterStore>,
    key: String,
}

impl StoreShutdownSignal {
    pub fn new(store: Arc<dyn CounterStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Asks every watchdog of the scope to stop.
    pub async fn request(&self) -> Result<(), StoreError> {
        self.store.set(&self.key, 1).await?;
        info!(key = %self.key, "Shutdown requested");
        Ok(())
    }

    /// Lets watchdogs run again.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(&self.key).await?;
        info!(key = %self.key, "Shutdown flag cleared");
        Ok(())
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl ShutdownSignal for StoreShutdownSignal {
    async fn is_requested(&self) -> Result<bool, StoreError> {
        Ok(self.store.get(&self.key).await? != 0)
    }
}

/// Remembers a positive answer so a request stays in force for the rest of
/// the invocation, even if the underlying flag is cleared meanwhile.
pub(crate) struct LatchedShutdown {
    source: Arc<dyn ShutdownSignal>,
    seen: AtomicBool,
}

impl LatchedShutdown {
    pub(crate) fn new(source: Arc<dyn ShutdownSignal>) -> Self {
        Self {
            source,
            seen: AtomicBool::new(false),
        }
    }

    pub(crate) async fn check(&self) -> Result<bool, StoreError> {
        if self.seen.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let requested = self.source.is_requested().await?;
        if requested {
            self.seen.store(true, Ordering::SeqCst);
        }
        Ok(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercom::MemoryCounterStore;

    #[tokio::test]
    async fn test_store_signal_request_and_clear() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let signal = StoreShutdownSignal::new(store, "fleet:shutdown");

        assert!(!signal.is_requested().await.unwrap());
        signal.request().await.unwrap();
        assert!(signal.is_requested().await.unwrap());
        signal.clear().await.unwrap();
        assert!(!signal.is_requested().await.unwrap());
    }

    #[tokio::test]
    async fn test_latch_keeps_request_after_flag_cleared() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let signal = StoreShutdownSignal::new(store, "fleet:shutdown");
        let latched = LatchedShutdown::new(Arc::new(signal.clone()));

        assert!(!latched.check().await.unwrap());
        signal.request().await.unwrap();
        assert!(latched.check().await.unwrap());
        signal.clear().await.unwrap();
        assert!(latched.check().await.unwrap());
    }

    #[tokio::test]
    async fn test_flag_wakes_waiters() {
        let flag = ShutdownFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.requested().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        flag.request();
        waiter.await.unwrap();
        assert!(flag.is_set());
        // Already set: resolves at once.
        flag.requested().await;
    }
}
