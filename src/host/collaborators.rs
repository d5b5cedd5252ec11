//! Builds the collaborators named by a [`WatchdogConfig`].
//!
//! Every locator is either a Redis/HTTP URL or `disabled`. Disabled
//! collaborators are replaced by in-process stand-ins, so a fully disabled
//! configuration runs without any external service.

use std::sync::Arc;

use tracing::{info, warn};

use super::handler::WatchdogHandler;
use crate::broker::{DisabledQueue, QueueDepthProvider, RedisQueueDepth};
use crate::config::{Locator, WatchdogConfig};
use crate::error::WatchdogError;
use crate::intercom::{CounterStore, MemoryCounterStore, RedisCounterStore, WorkerRegistry};
use crate::invoker::{DisabledInvoker, HttpInvoker, WorkerInvoker};
use crate::lock::{ExclusivityLock, LocalLock, RedisLock};
use crate::watchdog::{ShutdownFlag, StoreShutdownSignal, Watchdog};

/// Connected collaborators of one watchdog process.
#[derive(Clone)]
pub struct Collaborators {
    pub queue: Arc<dyn QueueDepthProvider>,
    pub store: Arc<dyn CounterStore>,
    pub lock: Arc<dyn ExclusivityLock>,
    pub invoker: Arc<dyn WorkerInvoker>,
}

impl Collaborators {
    /// Connects every collaborator `config` names.
    ///
    /// # Errors
    ///
    /// Returns the first connection or client construction failure.
    pub async fn connect(config: &WatchdogConfig) -> Result<Self, WatchdogError> {
        let queue: Arc<dyn QueueDepthProvider> = match &config.queue_locator {
            Locator::Disabled => Arc::new(DisabledQueue),
            Locator::Url(url) => Arc::new(RedisQueueDepth::connect(url).await?),
        };

        let store: Arc<dyn CounterStore> = match &config.intercom_locator {
            Locator::Disabled => {
                warn!("Counter store is disabled, counters are kept in this process only");
                Arc::new(MemoryCounterStore::new())
            }
            Locator::Url(url) => Arc::new(RedisCounterStore::connect(url).await?),
        };

        let lock: Arc<dyn ExclusivityLock> = match &config.lock_locator {
            Locator::Disabled => {
                warn!("Lock backend is disabled, locking is local to this process");
                Arc::new(LocalLock::new(config.lock_ttl))
            }
            Locator::Url(url) => Arc::new(RedisLock::connect(url, config.lock_ttl).await?),
        };

        if config.continuation_invoke_locator.is_disabled() {
            warn!("Continuation invocation is disabled, no successor will be started on timeout");
        }
        let invoker: Arc<dyn WorkerInvoker> = match (
            config.worker_invoke_locator.url(),
            config.continuation_invoke_locator.url(),
        ) {
            (None, None) => Arc::new(DisabledInvoker),
            (worker, continuation) => Arc::new(HttpInvoker::new(
                worker.map(str::to_string),
                continuation.map(str::to_string),
                config.invoke_timeout,
            )?),
        };

        info!(
            watchdog = %config.name,
            queue = %config.queue_locator,
            intercom = %config.intercom_locator,
            lock = %config.lock_locator,
            "Collaborators connected"
        );

        Ok(Self {
            queue,
            store,
            lock,
            invoker,
        })
    }

    /// Fleet-wide shutdown flag of the configured scope.
    pub fn shutdown_signal(&self, config: &WatchdogConfig) -> StoreShutdownSignal {
        StoreShutdownSignal::new(self.store.clone(), config.shutdown_key.clone())
    }

    pub fn worker_registry(&self, config: &WatchdogConfig) -> WorkerRegistry {
        WorkerRegistry::new(
            self.store.clone(),
            &config.name,
            config.worker_prefix.clone(),
            config.registration_ttl,
        )
    }

    /// Control loop for the configured scope, stopped by the store flag.
    ///
    /// `interrupt` is an in-process flag, e.g. set by a Ctrl-C handler; it
    /// also ends the waits of the loop.
    pub fn watchdog(&self, config: &WatchdogConfig, interrupt: Option<ShutdownFlag>) -> Watchdog {
        let watchdog = Watchdog::new(
            config.name.clone(),
            self.queue.clone(),
            self.store.clone(),
            self.invoker.clone(),
        )
        .with_queues(config.queues.clone())
        .with_worker_prefix(config.worker_prefix.clone())
        .with_settings(config.loop_settings.clone())
        .with_shutdown(Arc::new(self.shutdown_signal(config)));

        match interrupt {
            Some(flag) => watchdog.with_interrupt(flag),
            None => watchdog,
        }
    }

    pub fn handler(
        &self,
        config: &WatchdogConfig,
        interrupt: Option<ShutdownFlag>,
    ) -> WatchdogHandler {
        WatchdogHandler::new(
            self.watchdog(config, interrupt),
            self.lock.clone(),
            self.invoker.clone(),
        )
        .with_spare_time(config.spare_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{FixedBudget, HandlerOutcome};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_disabled_config_runs_in_process() {
        let config = WatchdogConfig::disabled();
        let collaborators = Collaborators::connect(&config).await.unwrap();

        assert_eq!(collaborators.queue.depth("celery").await.unwrap(), 0);

        let handler = collaborators.handler(&config, None);
        let outcome = handler
            .handle(&FixedBudget::new(Duration::from_secs(120)))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Fulfilled { workers_started: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_flag_stops_the_watchdog() {
        let config = WatchdogConfig::disabled();
        let collaborators = Collaborators::connect(&config).await.unwrap();
        collaborators.shutdown_signal(&config).request().await.unwrap();

        let outcome = collaborators
            .handler(&config, None)
            .handle(&FixedBudget::new(Duration::from_secs(120)))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::ShutdownExecuted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_flag_stops_the_watchdog() {
        let config = WatchdogConfig::disabled();
        let collaborators = Collaborators::connect(&config).await.unwrap();
        let interrupt = ShutdownFlag::new();
        interrupt.request();

        let outcome = collaborators
            .handler(&config, Some(interrupt))
            .handle(&FixedBudget::new(Duration::from_secs(120)))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::ShutdownExecuted);
    }
}
