//! Named accessors over the shared store.
//!
//! The watchdog side ([`WatchdogCounters`]) only reads the counters. The worker
//! side ([`WorkerRegistry`]) is what a worker calls when it begins and ends a
//! task; it is the only writer of the started/fulfilled counters.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::store::{CounterStore, StoreError};

/// Key of the started counter for a watchdog scope.
pub fn started_key(name: &str) -> String {
    format!("{}:workers_started", name)
}

/// Key of the fulfilled counter for a watchdog scope.
pub fn fulfilled_key(name: &str) -> String {
    format!("{}:workers_fulfilled", name)
}

/// Snapshot of the progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub started: i64,
    pub fulfilled: i64,
}

impl CounterSnapshot {
    /// Workers started but not yet confirmed complete.
    ///
    /// Reads are only eventually consistent, so a transiently negative
    /// difference is reported as zero.
    pub fn not_served(&self) -> u64 {
        (self.started - self.fulfilled).max(0) as u64
    }

    /// Workers started after `baseline` that have not finished yet.
    ///
    /// Leftovers from earlier runs (crashed workers, for one) are part of
    /// `baseline` and drop out of the difference.
    pub fn not_served_since(&self, baseline: &CounterSnapshot) -> u64 {
        let started = self.started - baseline.started;
        let fulfilled = self.fulfilled - baseline.fulfilled;
        (started - fulfilled).max(0) as u64
    }
}

/// Read access to the counters of one watchdog scope.
#[derive(Clone)]
pub struct WatchdogCounters {
    store: Arc<dyn CounterStore>,
    started_key: String,
    fulfilled_key: String,
}

impl WatchdogCounters {
    pub fn new(store: Arc<dyn CounterStore>, name: &str) -> Self {
        Self {
            store,
            started_key: started_key(name),
            fulfilled_key: fulfilled_key(name),
        }
    }

    pub async fn workers_started(&self) -> Result<i64, StoreError> {
        self.store.get(&self.started_key).await
    }

    pub async fn workers_fulfilled(&self) -> Result<i64, StoreError> {
        self.store.get(&self.fulfilled_key).await
    }

    /// Reads both counters.
    ///
    /// `fulfilled` is read before `started`: a worker always bumps `started`
    /// first, so this order never observes more fulfillments than starts.
    pub async fn snapshot(&self) -> Result<CounterSnapshot, StoreError> {
        let fulfilled = self.workers_fulfilled().await?;
        let started = self.workers_started().await?;
        Ok(CounterSnapshot { started, fulfilled })
    }

    pub async fn workers_not_served(&self) -> Result<u64, StoreError> {
        Ok(self.snapshot().await?.not_served())
    }

    /// Zeroes both counters. Operator action only; the control loop never
    /// writes counters.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.store.set(&self.started_key, 0).await?;
        self.store.set(&self.fulfilled_key, 0).await?;
        Ok(())
    }
}

/// Worker-side registration.
///
/// A worker calls [`register_started`](Self::register_started) once it is up
/// and [`register_fulfilled`](Self::register_fulfilled) when its task is done.
#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<dyn CounterStore>,
    prefix: String,
    started_key: String,
    fulfilled_key: String,
    ttl: Duration,
}

impl WorkerRegistry {
    /// Creates a registry for the watchdog scope `name`.
    ///
    /// `prefix` is prepended to worker ids to form registration keys, `ttl`
    /// bounds how long a crashed worker stays registered.
    pub fn new(
        store: Arc<dyn CounterStore>,
        name: &str,
        prefix: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            started_key: started_key(name),
            fulfilled_key: fulfilled_key(name),
            ttl,
        }
    }

    fn registration_key(&self, worker_id: &str) -> String {
        format!("{}{}", self.prefix, worker_id)
    }

    /// Registers the worker and bumps the started counter.
    pub async fn register_started(&self, worker_id: &str) -> Result<i64, StoreError> {
        let key = self.registration_key(worker_id);
        self.store
            .put_ex(&key, &Utc::now().to_rfc3339(), self.ttl)
            .await?;
        let started = self.store.incr(&self.started_key, 1).await?;
        debug!(worker_id = %worker_id, started = started, "Worker registered as started");
        Ok(started)
    }

    /// Removes the registration and bumps the fulfilled counter.
    ///
    /// Returns `false` without touching the counter when no registration was
    /// present (never started, already finished, or expired), which keeps
    /// `fulfilled ≤ started`.
    pub async fn register_fulfilled(&self, worker_id: &str) -> Result<bool, StoreError> {
        let key = self.registration_key(worker_id);
        if !self.store.delete(&key).await? {
            warn!(worker_id = %worker_id, "Worker finished without a live registration");
            return Ok(false);
        }
        let fulfilled = self.store.incr(&self.fulfilled_key, 1).await?;
        debug!(worker_id = %worker_id, fulfilled = fulfilled, "Worker registered as fulfilled");
        Ok(true)
    }

    /// Number of workers currently registered.
    pub async fn active_workers(&self) -> Result<u64, StoreError> {
        self.store.count_prefix(&self.prefix).await
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercom::MemoryCounterStore;

    fn setup() -> (WatchdogCounters, WorkerRegistry) {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let counters = WatchdogCounters::new(store.clone(), "fleet");
        let registry = WorkerRegistry::new(store, "fleet", "fleet:worker:", Duration::from_secs(60));
        (counters, registry)
    }

    #[test]
    fn test_counter_keys() {
        assert_eq!(started_key("fleet"), "fleet:workers_started");
        assert_eq!(fulfilled_key("fleet"), "fleet:workers_fulfilled");
    }

    #[test]
    fn test_not_served_clamps_negative() {
        let snapshot = CounterSnapshot {
            started: 2,
            fulfilled: 3,
        };
        assert_eq!(snapshot.not_served(), 0);

        let snapshot = CounterSnapshot {
            started: 5,
            fulfilled: 3,
        };
        assert_eq!(snapshot.not_served(), 2);
    }

    #[test]
    fn test_not_served_since_ignores_earlier_leftovers() {
        // One worker of an earlier run crashed after starting.
        let baseline = CounterSnapshot {
            started: 4,
            fulfilled: 3,
        };
        assert_eq!(baseline.not_served_since(&baseline), 0);

        let later = CounterSnapshot {
            started: 6,
            fulfilled: 4,
        };
        assert_eq!(later.not_served(), 2);
        assert_eq!(later.not_served_since(&baseline), 1);

        // The straggler finishing late does not go negative.
        let late = CounterSnapshot {
            started: 6,
            fulfilled: 7,
        };
        assert_eq!(late.not_served_since(&baseline), 0);
    }

    #[tokio::test]
    async fn test_worker_lifecycle_updates_counters() {
        let (counters, registry) = setup();

        registry.register_started("a").await.unwrap();
        registry.register_started("b").await.unwrap();
        assert_eq!(counters.workers_started().await.unwrap(), 2);
        assert_eq!(counters.workers_not_served().await.unwrap(), 2);
        assert_eq!(registry.active_workers().await.unwrap(), 2);

        assert!(registry.register_fulfilled("a").await.unwrap());
        assert_eq!(counters.workers_fulfilled().await.unwrap(), 1);
        assert_eq!(counters.workers_not_served().await.unwrap(), 1);
        assert_eq!(registry.active_workers().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fulfilled_never_exceeds_started() {
        let (counters, registry) = setup();

        // Never started.
        assert!(!registry.register_fulfilled("ghost").await.unwrap());

        registry.register_started("a").await.unwrap();
        assert!(registry.register_fulfilled("a").await.unwrap());
        // Duplicate finish.
        assert!(!registry.register_fulfilled("a").await.unwrap());

        let snapshot = counters.snapshot().await.unwrap();
        assert_eq!(snapshot.started, 1);
        assert_eq!(snapshot.fulfilled, 1);
        assert!(snapshot.fulfilled <= snapshot.started);
    }

    #[tokio::test]
    async fn test_reset() {
        let (counters, registry) = setup();
        registry.register_started("a").await.unwrap();
        counters.reset().await.unwrap();
        assert_eq!(counters.snapshot().await.unwrap(), CounterSnapshot::default());
    }
}
