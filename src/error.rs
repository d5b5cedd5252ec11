//! Error types for watchdog operations.
//!
//! Each collaborator has its own error enum next to its code; this module
//! gathers them into the one error a watchdog run can end with:
//! - Configuration (missing or invalid locators)
//! - Broker depth queries
//! - Counter store access
//! - Lock backend
//! - Invocation transport
//!
//! Deadline expiry and explicit shutdown are not errors; they are reported as
//! outcomes by the control loop and the handler.

use std::time::Duration;

use thiserror::Error;

use crate::broker::QueueError;
use crate::config::ConfigError;
use crate::intercom::StoreError;
use crate::invoker::InvokeError;
use crate::lock::LockError;

/// Errors that end a watchdog run abnormally.
#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue depth query failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Invocation error: {0}")]
    Invoke(#[from] InvokeError),

    /// Fewer workers registered as started than were triggered before the
    /// start ceiling elapsed.
    #[error("Workers failed to start: {observed} of {expected} started within {waited:?}")]
    WorkersDidNotStart {
        expected: u64,
        observed: u64,
        waited: Duration,
    },
}
