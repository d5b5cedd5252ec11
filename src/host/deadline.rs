//! Time budget of one watchdog invocation.
//!
//! The execution host kills an invocation when its budget runs out. The
//! watchdog stops `spare_time` earlier so there is always time left to release
//! the lock and request a successor.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::invoker::{ContinuationRequest, InvocationReceipt, InvokeError, WorkerInvoker};

/// Budget assumed when the host cannot report its remaining time.
pub const FALLBACK_REMAINING_TIME: Duration = Duration::from_secs(5 * 60);

/// Query the execution host answers about the current invocation.
pub trait ExecutionContext: Send + Sync {
    /// Time left before the host terminates the invocation, if known.
    fn remaining_time(&self) -> Option<Duration>;
}

/// Budget measured from the moment the context was created.
///
/// Used when running outside a serverless host, e.g. from the CLI.
#[derive(Debug, Clone, Copy)]
pub struct FixedBudget {
    ends_at: Instant,
}

impl FixedBudget {
    pub fn new(budget: Duration) -> Self {
        Self {
            ends_at: Instant::now() + budget,
        }
    }
}

impl ExecutionContext for FixedBudget {
    fn remaining_time(&self) -> Option<Duration> {
        Some(self.ends_at.saturating_duration_since(Instant::now()))
    }
}

/// Host that cannot report its remaining time.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownBudget;

impl ExecutionContext for UnknownBudget {
    fn remaining_time(&self) -> Option<Duration> {
        None
    }
}

/// Point in time at which the control loop must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(duration: Duration) -> Self {
        Self(Instant::now() + duration)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Zero once the deadline has passed.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// Turns the host's remaining time into a deadline and, once the deadline
/// is hit, into a continuation request.
pub struct DeadlineGuard<'a> {
    context: &'a dyn ExecutionContext,
    spare_time: Duration,
}

impl<'a> DeadlineGuard<'a> {
    pub fn new(context: &'a dyn ExecutionContext, spare_time: Duration) -> Self {
        Self {
            context,
            spare_time,
        }
    }

    /// `now + remaining − spare_time`, never earlier than now.
    pub fn deadline(&self) -> Deadline {
        let remaining = match self.context.remaining_time() {
            Some(remaining) => remaining,
            None => {
                warn!(
                    fallback_secs = FALLBACK_REMAINING_TIME.as_secs(),
                    "Host did not report remaining time, using fallback budget"
                );
                FALLBACK_REMAINING_TIME
            }
        };
        let usable = remaining.saturating_sub(self.spare_time);
        info!(
            remaining_secs = remaining.as_secs_f64(),
            spare_secs = self.spare_time.as_secs_f64(),
            usable_secs = usable.as_secs_f64(),
            "Computed watchdog deadline"
        );
        Deadline::after(usable)
    }

    /// Issues exactly one continuation request and waits for its
    /// acknowledgment.
    pub async fn request_continuation(
        &self,
        invoker: &dyn WorkerInvoker,
        watchdog: &str,
    ) -> Result<InvocationReceipt, InvokeError> {
        let request = ContinuationRequest::new(watchdog, "deadline reached");
        let receipt = invoker.trigger_continuation(&request).await?;
        info!(
            watchdog = watchdog,
            status = ?receipt.status,
            request_id = ?receipt.request_id,
            "Continuation requested"
        );
        Ok(receipt)
    }
}
