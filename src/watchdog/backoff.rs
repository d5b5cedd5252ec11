//! Backoff polling until a condition holds.
//!
//! [`poll_until`] is the single wait primitive of the control loop. It probes
//! a value, and while the value is not acceptable sleeps for the next delay of
//! a Fibonacci sequence. Two optional limits stop the wait early:
//!
//! - `max_wait`: total time budget; on expiry the last probed value is returned
//! - `deadline`: hard stop of the whole monitor; the wait sleeps until the
//!   deadline at most, then reports it
//!
//! Sleeps are clamped to both limits, so neither is ever overshot.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::host::Deadline;

/// Fibonacci delays: `unit × 1, 1, 2, 3, 5, 8, …`, each capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Fibonacci {
    unit: Duration,
    max_delay: Option<Duration>,
    current: u64,
    next: u64,
}

impl Fibonacci {
    pub fn new(unit: Duration, max_delay: Option<Duration>) -> Self {
        Self {
            unit,
            max_delay,
            current: 1,
            next: 1,
        }
    }
}

impl Iterator for Fibonacci {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let factor = u32::try_from(self.current).unwrap_or(u32::MAX);
        let delay = self.unit.saturating_mul(factor);

        let following = self.current.saturating_add(self.next);
        self.current = self.next;
        self.next = following;

        Some(match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        })
    }
}

/// How a [`poll_until`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    /// The probed value was accepted.
    Ready(T),
    /// `max_wait` elapsed; carries the last probed value.
    Exhausted(T),
    /// The deadline was reached before the value was accepted.
    DeadlineReached,
}

impl<T> WaitOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Probes until `accept` holds, sleeping along `delays` between attempts.
///
/// When `delays` runs out, its last delay is reused. Probe errors are returned
/// immediately.
pub async fn poll_until<T, E, P, Fut, A, D>(
    mut probe: P,
    accept: A,
    delays: D,
    max_wait: Option<Duration>,
    deadline: Option<Deadline>,
) -> Result<WaitOutcome<T>, E>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    A: Fn(&T) -> bool,
    D: IntoIterator<Item = Duration>,
{
    let started = Instant::now();
    let mut delays = delays.into_iter();
    let mut last_delay = Duration::ZERO;

    loop {
        let value = probe().await?;
        if accept(&value) {
            return Ok(WaitOutcome::Ready(value));
        }

        let mut pause = delays.next().unwrap_or(last_delay);
        last_delay = pause;

        if let Some(max_wait) = max_wait {
            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                return Ok(WaitOutcome::Exhausted(value));
            }
            pause = pause.min(max_wait - elapsed);
        }

        if let Some(deadline) = deadline {
            let left = deadline.remaining();
            if left <= pause {
                tokio::time::sleep_until(deadline.instant()).await;
                return Ok(WaitOutcome::DeadlineReached);
            }
        }

        tokio::time::sleep(pause).await;
    }
}
