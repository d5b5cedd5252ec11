//! The autoscaling control loop.
//!
//! Each iteration reads the queue depth, triggers one worker per pending
//! task, waits for them to register as started, waits (bounded) for them to
//! finish, and re-triggers stragglers. The loop ends when the queue is empty,
//! when a shutdown is requested, or when the deadline is reached.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::{poll_until, Fibonacci, WaitOutcome};
use super::shutdown::{LatchedShutdown, NeverShutdown, ShutdownFlag, ShutdownSignal};
use crate::broker::{total_depth, QueueDepthProvider};
use crate::config::{default_worker_prefix, LoopSettings, DEFAULT_QUEUE};
use crate::error::WatchdogError;
use crate::host::Deadline;
use crate::intercom::{CounterSnapshot, CounterStore, StoreError, WatchdogCounters};
use crate::invoker::{InvokeError, WorkerInvocation, WorkerInvoker};
use crate::metrics::{MetricsCollector, TriggerPhase};

/// Why [`Watchdog::monitor`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The queue is empty. `workers_started` is how many workers registered
    /// as started while this monitor ran.
    Drained { workers_started: u64 },
    /// The deadline passed before the queue drained.
    DeadlineReached,
    /// An operator asked the watchdog to stop.
    ShutdownRequested,
}

impl MonitorExit {
    pub fn is_drained(&self) -> bool {
        matches!(self, Self::Drained { .. })
    }
}

/// Control loop bound to one queue set and one counter scope.
pub struct Watchdog {
    name: String,
    queues: Vec<String>,
    worker_prefix: String,
    queue: Arc<dyn QueueDepthProvider>,
    counters: WatchdogCounters,
    invoker: Arc<dyn WorkerInvoker>,
    shutdown: Arc<dyn ShutdownSignal>,
    interrupt: Option<ShutdownFlag>,
    settings: LoopSettings,
    metrics: MetricsCollector,
}

impl Watchdog {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn QueueDepthProvider>,
        store: Arc<dyn CounterStore>,
        invoker: Arc<dyn WorkerInvoker>,
    ) -> Self {
        let name = name.into();
        Self {
            queues: vec![DEFAULT_QUEUE.to_string()],
            worker_prefix: default_worker_prefix(&name),
            counters: WatchdogCounters::new(store, &name),
            metrics: MetricsCollector::new(name.clone()),
            queue,
            invoker,
            shutdown: Arc::new(NeverShutdown),
            interrupt: None,
            settings: LoopSettings::default(),
            name,
        }
    }

    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_worker_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_prefix = prefix.into();
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<dyn ShutdownSignal>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// In-process flag that also ends the start and fulfillment waits.
    ///
    /// The flag is checked at iteration boundaries as well, next to the
    /// configured shutdown signal.
    pub fn with_interrupt(mut self, interrupt: ShutdownFlag) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counters(&self) -> &WatchdogCounters {
        &self.counters
    }

    /// Runs the loop until the queue drains, a shutdown is requested or
    /// `deadline` passes.
    ///
    /// Depth, store and invocation errors end the loop unretried.
    pub async fn monitor(&self, deadline: Option<Deadline>) -> Result<MonitorExit, WatchdogError> {
        let shutdown = LatchedShutdown::new(self.shutdown.clone());
        let baseline = self.counters.snapshot().await?;
        let mut iteration: u64 = 0;

        info!(watchdog = %self.name, queues = ?self.queues, "Watchdog monitor started");

        loop {
            iteration += 1;

            if shutdown.check().await? || self.interrupt.as_ref().is_some_and(|f| f.is_set()) {
                info!(watchdog = %self.name, iteration, "Shutdown requested, stopping monitor");
                return Ok(MonitorExit::ShutdownRequested);
            }
            if deadline.is_some_and(|d| d.is_expired()) {
                info!(watchdog = %self.name, iteration, "Deadline reached, stopping monitor");
                return Ok(MonitorExit::DeadlineReached);
            }

            let depth = total_depth(self.queue.as_ref(), &self.queues).await?;
            self.metrics.record_iteration(depth);
            debug!(watchdog = %self.name, iteration, depth, "Read queue depth");

            if depth == 0 {
                let started = self.counters.workers_started().await?;
                let workers_started = (started - baseline.started).max(0) as u64;
                info!(watchdog = %self.name, workers_started, "Queue drained");
                return Ok(MonitorExit::Drained { workers_started });
            }

            let before = self.counters.workers_started().await?;
            self.trigger_workers(depth, TriggerPhase::Initial).await?;

            let started = tokio::select! {
                started = self.wait_starts(before, depth, deadline) => started?,
                _ = self.interrupted() => {
                    info!(watchdog = %self.name, "Interrupted while waiting for worker starts");
                    return Ok(MonitorExit::ShutdownRequested);
                }
            };
            if !started {
                info!(watchdog = %self.name, "Deadline reached while waiting for worker starts");
                return Ok(MonitorExit::DeadlineReached);
            }

            let fulfillment = tokio::select! {
                not_served = self.wait_fulfillment(&baseline, deadline) => not_served?,
                _ = self.interrupted() => {
                    info!(watchdog = %self.name, "Interrupted while waiting for fulfillment");
                    return Ok(MonitorExit::ShutdownRequested);
                }
            };
            let Some(not_served) = fulfillment else {
                info!(watchdog = %self.name, "Deadline reached while waiting for fulfillment");
                return Ok(MonitorExit::DeadlineReached);
            };
            self.metrics.record_not_served(not_served);

            if not_served > 0 {
                warn!(
                    watchdog = %self.name,
                    not_served,
                    "Workers not served after fulfillment wait, triggering replacements"
                );
                self.trigger_workers(not_served, TriggerPhase::Retrigger).await?;
            }
        }
    }

    /// Requests `count` workers, at most `trigger_concurrency` at a time.
    ///
    /// Every request is awaited; the first failure is returned afterwards.
    async fn trigger_workers(&self, count: u64, phase: TriggerPhase) -> Result<(), WatchdogError> {
        let permits = Arc::new(Semaphore::new(self.settings.trigger_concurrency.max(1)));
        let invoker = &self.invoker;

        let mut futures = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let sem = permits.clone();
            let invocation = WorkerInvocation::new(&self.name, &self.worker_prefix);
            futures.push(async move {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|e| InvokeError::RequestFailed(e.to_string()))?;
                invoker.trigger_worker(&invocation).await
            });
        }
        let results = join_all(futures).await;

        let mut accepted: u64 = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(_) => accepted += 1,
                Err(e) => {
                    warn!(watchdog = %self.name, error = %e, "Worker trigger failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        self.metrics.record_triggered(phase, accepted);
        info!(
            watchdog = %self.name,
            phase = %phase,
            requested = count,
            triggered = accepted,
            "Triggered workers"
        );

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Waits until `expected` more workers than `before` registered as
    /// started. Returns `false` when the deadline interrupted the wait.
    async fn wait_starts(
        &self,
        before: i64,
        expected: u64,
        deadline: Option<Deadline>,
    ) -> Result<bool, WatchdogError> {
        let target = before.saturating_add(i64::try_from(expected).unwrap_or(i64::MAX));
        let started_at = Instant::now();

        let outcome = poll_until(
            || self.counters.workers_started(),
            |started| *started >= target,
            self.delays(),
            self.settings.start_timeout,
            deadline,
        )
        .await?;
        self.metrics.record_wait("starts", started_at.elapsed());

        match outcome {
            WaitOutcome::Ready(started) => {
                debug!(watchdog = %self.name, started, target, "Workers started");
                Ok(true)
            }
            WaitOutcome::Exhausted(started) => Err(WatchdogError::WorkersDidNotStart {
                expected,
                observed: (started - before).max(0) as u64,
                waited: started_at.elapsed(),
            }),
            WaitOutcome::DeadlineReached => Ok(false),
        }
    }

    /// Waits (bounded) for every worker started since `baseline` to finish
    /// and returns how many have not. `None` when the deadline interrupted the
    /// wait.
    async fn wait_fulfillment(
        &self,
        baseline: &CounterSnapshot,
        deadline: Option<Deadline>,
    ) -> Result<Option<u64>, WatchdogError> {
        let started_at = Instant::now();
        let counters = &self.counters;

        let outcome = poll_until(
            move || async move {
                let now = counters.snapshot().await?;
                Ok::<_, StoreError>(now.not_served_since(baseline))
            },
            |not_served| *not_served == 0,
            self.delays(),
            Some(self.settings.fulfillment_max_wait),
            deadline,
        )
        .await?;
        self.metrics.record_wait("fulfillment", started_at.elapsed());

        Ok(match outcome {
            WaitOutcome::Ready(not_served) | WaitOutcome::Exhausted(not_served) => Some(not_served),
            WaitOutcome::DeadlineReached => None,
        })
    }

    /// Pends forever without an interrupt flag.
    async fn interrupted(&self) {
        match &self.interrupt {
            Some(flag) => flag.requested().await,
            None => std::future::pending().await,
        }
    }

    fn delays(&self) -> Fibonacci {
        Fibonacci::new(self.settings.backoff_unit, self.settings.backoff_max_delay)
    }
}
