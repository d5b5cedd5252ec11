//! serverless-watchdog: autoscaling control loop for short-lived task workers.
//!
//! A watchdog observes the depth of a task queue, invokes one worker per
//! pending task, tracks how many workers started and finished through shared
//! counters, retries stragglers, and hands off to a successor before its own
//! time budget runs out.

pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod intercom;
pub mod invoker;
pub mod lock;
pub mod metrics;
pub mod watchdog;

// Re-export commonly used types
pub use config::{ConfigError, Locator, LoopSettings, WatchdogConfig};
pub use error::WatchdogError;
pub use host::{HandlerOutcome, WatchdogHandler};
pub use watchdog::{MonitorExit, Watchdog};
