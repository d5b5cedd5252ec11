//! In-memory stand-ins for the broker, the worker platform and the lock,
//! shared by the scenario tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serverless_watchdog::broker::{QueueDepthProvider, QueueError};
use serverless_watchdog::intercom::{CounterStore, StoreError, WorkerRegistry};
use serverless_watchdog::invoker::{
    ContinuationRequest, InvocationReceipt, InvokeError, WorkerInvocation, WorkerInvoker,
};
use serverless_watchdog::lock::{ExclusivityLock, LocalLock, LockError, LockHandle};
use serverless_watchdog::watchdog::ShutdownSignal;

pub const WATCHDOG: &str = "celery_serverless:watchdog";

/// Queue holding a plain number of pending tasks.
#[derive(Default)]
pub struct FakeQueue {
    pending: AtomicU64,
}

impl FakeQueue {
    pub fn with_tasks(tasks: u64) -> Arc<Self> {
        Arc::new(Self {
            pending: AtomicU64::new(tasks),
        })
    }

    /// Takes one task. Returns `false` when the queue was already empty.
    pub fn pop(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .is_ok()
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueDepthProvider for FakeQueue {
    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        if queue == "celery" {
            Ok(self.pending())
        } else {
            Ok(0)
        }
    }
}

/// What a simulated worker does once invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerBehavior {
    /// Takes a task, registers, finishes.
    Healthy,
    /// Registers as started, then dies without taking a task or finishing.
    CrashAfterStart,
    /// Registers and finishes but leaves the queue untouched.
    Idle,
}

/// Worker platform that runs each invocation as a background task.
///
/// A worker registers as started after `start_delay`, taking one task off the
/// queue at the same moment, and registers as fulfilled `work_time` later.
pub struct SimulatedPlatform {
    queue: Arc<FakeQueue>,
    store: Arc<dyn CounterStore>,
    start_delay: Duration,
    work_time: Duration,
    scripted: Mutex<VecDeque<WorkerBehavior>>,
    default_behavior: WorkerBehavior,
    pub workers_triggered: AtomicU64,
    pub continuations: AtomicU64,
    lock_probe: Option<Arc<CountingLock>>,
    pub releases_seen_by_continuation: Mutex<Vec<usize>>,
}

impl SimulatedPlatform {
    pub fn new(
        queue: Arc<FakeQueue>,
        store: Arc<dyn CounterStore>,
        start_delay: Duration,
        work_time: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            start_delay,
            work_time,
            scripted: Mutex::new(VecDeque::new()),
            default_behavior: WorkerBehavior::Healthy,
            workers_triggered: AtomicU64::new(0),
            continuations: AtomicU64::new(0),
            lock_probe: None,
            releases_seen_by_continuation: Mutex::new(Vec::new()),
        }
    }

    /// Behaviors for the first invocations; later ones use the default.
    pub fn with_script(self, script: Vec<WorkerBehavior>) -> Self {
        *self.scripted.lock().unwrap() = script.into();
        self
    }

    pub fn with_default_behavior(mut self, behavior: WorkerBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Records how many releases `lock` had seen when a continuation arrives.
    pub fn observing_lock(mut self, lock: Arc<CountingLock>) -> Self {
        self.lock_probe = Some(lock);
        self
    }

    pub fn triggered(&self) -> u64 {
        self.workers_triggered.load(Ordering::SeqCst)
    }

    pub fn continuations(&self) -> u64 {
        self.continuations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerInvoker for SimulatedPlatform {
    async fn trigger_worker(
        &self,
        invocation: &WorkerInvocation,
    ) -> Result<InvocationReceipt, InvokeError> {
        self.workers_triggered.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_behavior);

        let registry = WorkerRegistry::new(
            self.store.clone(),
            &invocation.watchdog,
            invocation.prefix.clone(),
            Duration::from_secs(900),
        );
        let worker_id = invocation.worker_id.to_string();
        let queue = self.queue.clone();
        let start_delay = self.start_delay;
        let work_time = self.work_time;

        tokio::spawn(async move {
            tokio::time::sleep(start_delay).await;
            if behavior == WorkerBehavior::Healthy {
                queue.pop();
            }
            registry.register_started(&worker_id).await.unwrap();
            if behavior == WorkerBehavior::CrashAfterStart {
                return;
            }
            tokio::time::sleep(work_time).await;
            registry.register_fulfilled(&worker_id).await.unwrap();
        });

        Ok(InvocationReceipt::accepted(202, None))
    }

    async fn trigger_continuation(
        &self,
        _request: &ContinuationRequest,
    ) -> Result<InvocationReceipt, InvokeError> {
        if let Some(lock) = &self.lock_probe {
            self.releases_seen_by_continuation
                .lock()
                .unwrap()
                .push(lock.releases());
        }
        // The platform takes a moment to acknowledge.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.continuations.fetch_add(1, Ordering::SeqCst);
        Ok(InvocationReceipt::accepted(202, Some("successor-1".to_string())))
    }
}

/// Platform whose worker endpoint is unreachable.
#[derive(Default)]
pub struct UnreachablePlatform {
    pub continuations: AtomicU64,
}

#[async_trait]
impl WorkerInvoker for UnreachablePlatform {
    async fn trigger_worker(
        &self,
        _invocation: &WorkerInvocation,
    ) -> Result<InvocationReceipt, InvokeError> {
        Err(InvokeError::RequestFailed("connection refused".to_string()))
    }

    async fn trigger_continuation(
        &self,
        _request: &ContinuationRequest,
    ) -> Result<InvocationReceipt, InvokeError> {
        self.continuations.fetch_add(1, Ordering::SeqCst);
        Ok(InvocationReceipt::accepted(202, None))
    }
}

/// Local lock that counts acquisitions and releases.
pub struct CountingLock {
    inner: LocalLock,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl CountingLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LocalLock::new(Duration::from_secs(900)),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }

    pub fn acquisitions(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExclusivityLock for CountingLock {
    async fn acquire(&self, name: &str) -> Result<LockHandle, LockError> {
        let handle = self.inner.acquire(name).await?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release(handle).await
    }
}

/// Shutdown signal answering from a fixed script, then repeating `false`.
pub struct ScriptedShutdown {
    answers: Mutex<VecDeque<bool>>,
    checks: AtomicUsize,
}

impl ScriptedShutdown {
    pub fn new(answers: Vec<bool>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShutdownSignal for ScriptedShutdown {
    async fn is_requested(&self) -> Result<bool, StoreError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.answers.lock().unwrap().pop_front().unwrap_or(false))
    }
}
