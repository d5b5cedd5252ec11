//! Shared progress counters between the watchdog and its workers.
//!
//! All state is keyed by the watchdog name:
//!
//! - `{name}:workers_started`: incremented by each worker once it is up
//! - `{name}:workers_fulfilled`: incremented by each worker once its task is done
//! - `{prefix}{worker_id}`: ephemeral registration of a running worker
//!
//! The store is shared by every watchdog and worker process of the fleet, so
//! increments go through an atomic primitive rather than get-then-set.

pub mod counters;
pub mod redis_store;
pub mod store;

pub use counters::{
    fulfilled_key, started_key, CounterSnapshot, WatchdogCounters, WorkerRegistry,
};
pub use redis_store::RedisCounterStore;
pub use store::{CounterStore, MemoryCounterStore, StoreError};
