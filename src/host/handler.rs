//! One watchdog invocation, as the execution host runs it.
//!
//! Lock, deadline, monitor, release, and the continuation hand-off are
//! composed here. The lock is released exactly once on every path before any
//! continuation is requested, so the successor can take it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use super::deadline::{DeadlineGuard, ExecutionContext};
use crate::error::WatchdogError;
use crate::invoker::{InvocationReceipt, WorkerInvoker};
use crate::lock::{release_quietly, ExclusivityLock, LockError};
use crate::metrics::MetricsCollector;
use crate::watchdog::{MonitorExit, Watchdog};

/// Message returned to the host with every completed invocation.
pub const RESPONSE_MESSAGE: &str = "Watchdog woke, worked, and rested.";

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The queue was drained.
    Fulfilled { workers_started: u64 },
    /// Time ran out; a successor watchdog was requested.
    ContinuationScheduled { receipt: InvocationReceipt },
    /// Stopped on an operator request; no successor.
    ShutdownExecuted,
    /// Another watchdog of the same scope holds the lock.
    AlreadyRunning,
}

impl HandlerOutcome {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fulfilled { .. } => "fulfilled",
            Self::ContinuationScheduled { .. } => "continuation_scheduled",
            Self::ShutdownExecuted => "shutdown_executed",
            Self::AlreadyRunning => "already_running",
        }
    }

    /// `200` when the queue was drained, `202` otherwise.
    pub fn status_code(&self) -> u16 {
        if self.is_fulfilled() {
            200
        } else {
            202
        }
    }

    pub fn response(&self) -> HandlerResponse {
        let mut body = json!({
            "message": RESPONSE_MESSAGE,
            "fulfilled": self.is_fulfilled(),
            "outcome": self.label(),
        });
        if let Self::Fulfilled { workers_started } = self {
            body["workers_started"] = json!(workers_started);
        }

        HandlerResponse {
            status_code: self.status_code(),
            body: body.to_string(),
        }
    }
}

/// Response shape expected by serverless HTTP hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

/// Runs one watchdog invocation.
pub struct WatchdogHandler {
    watchdog: Watchdog,
    lock: Arc<dyn ExclusivityLock>,
    invoker: Arc<dyn WorkerInvoker>,
    spare_time: Duration,
    metrics: MetricsCollector,
}

impl WatchdogHandler {
    /// `invoker` is used for the continuation request; the watchdog carries
    /// its own for workers.
    pub fn new(
        watchdog: Watchdog,
        lock: Arc<dyn ExclusivityLock>,
        invoker: Arc<dyn WorkerInvoker>,
    ) -> Self {
        let metrics = MetricsCollector::new(watchdog.name());
        Self {
            watchdog,
            lock,
            invoker,
            spare_time: Duration::from_secs(30),
            metrics,
        }
    }

    pub fn with_spare_time(mut self, spare_time: Duration) -> Self {
        self.spare_time = spare_time;
        self
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Acquires the lock, runs the monitor until it exits, releases the lock
    /// and turns the exit into an outcome.
    ///
    /// # Errors
    ///
    /// Errors of the monitor are returned after the lock was released. A
    /// failed continuation request is returned as well, since nobody would
    /// resume the work otherwise.
    ///
    /// # Panics
    ///
    /// A panic inside the monitor is resumed once the lock was released.
    pub async fn handle(
        &self,
        context: &dyn ExecutionContext,
    ) -> Result<HandlerOutcome, WatchdogError> {
        let name = self.watchdog.name();

        let handle = match self.lock.acquire(name).await {
            Ok(handle) => handle,
            Err(LockError::Unavailable(_)) => {
                info!(watchdog = %name, "Another watchdog is running, nothing to do");
                self.metrics.record_outcome(HandlerOutcome::AlreadyRunning.label());
                return Ok(HandlerOutcome::AlreadyRunning);
            }
            Err(e) => return Err(e.into()),
        };

        let guard = DeadlineGuard::new(context, self.spare_time);
        let result = AssertUnwindSafe(self.watchdog.monitor(Some(guard.deadline())))
            .catch_unwind()
            .await;
        release_quietly(self.lock.as_ref(), &handle).await;

        let result = match result {
            Ok(result) => result,
            Err(panic) => {
                error!(watchdog = %name, "Watchdog monitor panicked, lock released");
                std::panic::resume_unwind(panic);
            }
        };

        let exit = match result {
            Ok(exit) => exit,
            Err(e) => {
                error!(watchdog = %name, error = %e, "Watchdog monitor failed");
                return Err(e);
            }
        };

        let outcome = match exit {
            MonitorExit::Drained { workers_started } => HandlerOutcome::Fulfilled { workers_started },
            MonitorExit::DeadlineReached => {
                let receipt = guard.request_continuation(self.invoker.as_ref(), name).await?;
                HandlerOutcome::ContinuationScheduled { receipt }
            }
            MonitorExit::ShutdownRequested => HandlerOutcome::ShutdownExecuted,
        };

        self.metrics.record_outcome(outcome.label());
        info!(watchdog = %name, outcome = outcome.label(), "Watchdog invocation finished");
        Ok(outcome)
    }
}
