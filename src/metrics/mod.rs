//! Prometheus metrics for the watchdog.
//!
//! ```ignore
//! use serverless_watchdog::metrics::{init_metrics, export_metrics};
//!
//! init_metrics()?;
//! // ... run the watchdog ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, TriggerPhase};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    MONITOR_ITERATIONS, QUEUE_DEPTH, REGISTRY, RUN_OUTCOMES, WAIT_DURATION, WORKERS_NOT_SERVED,
    WORKERS_TRIGGERED,
};
