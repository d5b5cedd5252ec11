//! Recording helpers used by the control loop and the handler.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! been called, so library users that never export metrics pay nothing.

use std::time::Duration;

use super::prometheus::{
    MONITOR_ITERATIONS, QUEUE_DEPTH, RUN_OUTCOMES, WAIT_DURATION, WORKERS_NOT_SERVED,
    WORKERS_TRIGGERED,
};

/// Why a batch of workers was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPhase {
    /// One worker per pending task.
    Initial,
    /// Replacements for workers that started but never finished.
    Retrigger,
}

impl TriggerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Retrigger => "retrigger",
        }
    }
}

impl std::fmt::Display for TriggerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics collector for one watchdog scope.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    watchdog: String,
}

impl MetricsCollector {
    pub fn new(watchdog: impl Into<String>) -> Self {
        Self {
            watchdog: watchdog.into(),
        }
    }

    pub fn record_iteration(&self, depth: u64) {
        if let Some(iterations) = MONITOR_ITERATIONS.get() {
            iterations.with_label_values(&[self.watchdog.as_str()]).inc();
        }

        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[self.watchdog.as_str()])
                .set(depth as f64);
        }
    }

    pub fn record_triggered(&self, phase: TriggerPhase, count: u64) {
        if let Some(triggered) = WORKERS_TRIGGERED.get() {
            triggered
                .with_label_values(&[self.watchdog.as_str(), phase.as_str()])
                .inc_by(count as f64);
        }
    }

    pub fn record_wait(&self, wait: &str, elapsed: Duration) {
        if let Some(durations) = WAIT_DURATION.get() {
            durations
                .with_label_values(&[wait])
                .observe(elapsed.as_secs_f64());
        }
    }

    pub fn record_not_served(&self, not_served: u64) {
        if let Some(gauge) = WORKERS_NOT_SERVED.get() {
            gauge
                .with_label_values(&[self.watchdog.as_str()])
                .set(not_served as f64);
        }
    }

    pub fn record_outcome(&self, outcome: &str) {
        if let Some(outcomes) = RUN_OUTCOMES.get() {
            outcomes.with_label_values(&[outcome]).inc();
        }

        tracing::trace!(watchdog = %self.watchdog, outcome = outcome, "Recorded run outcome");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    #[test]
    fn test_trigger_phase_labels() {
        assert_eq!(TriggerPhase::Initial.as_str(), "initial");
        assert_eq!(TriggerPhase::Retrigger.to_string(), "retrigger");
    }

    #[test]
    fn test_recording_after_init() {
        let _ = init_metrics();
        let collector = MetricsCollector::new("collector-test");

        collector.record_iteration(7);
        collector.record_triggered(TriggerPhase::Initial, 7);
        collector.record_triggered(TriggerPhase::Retrigger, 2);
        collector.record_wait("starts", Duration::from_secs(3));
        collector.record_not_served(2);
        collector.record_outcome("fulfilled");

        let depth = QUEUE_DEPTH
            .get()
            .expect("initialized")
            .with_label_values(&["collector-test"])
            .get();
        assert!((depth - 7.0).abs() < f64::EPSILON);

        let retriggered = WORKERS_TRIGGERED
            .get()
            .expect("initialized")
            .with_label_values(&["collector-test", "retrigger"])
            .get();
        assert!((retriggered - 2.0).abs() < f64::EPSILON);
    }
}
