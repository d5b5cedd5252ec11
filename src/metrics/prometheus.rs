//! Prometheus metrics registration and export.
//!
//! This module defines the Prometheus metrics of the watchdog process and
//! provides functions for initializing, registering, and exporting them.
//! Metrics live in memory for the lifetime of the process only.

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all watchdog metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Last observed queue depth, labeled by watchdog.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Workers triggered, labeled by watchdog and phase (initial/retrigger).
pub static WORKERS_TRIGGERED: OnceLock<CounterVec> = OnceLock::new();

/// Workers left not served after the fulfillment wait, labeled by watchdog.
pub static WORKERS_NOT_SERVED: OnceLock<GaugeVec> = OnceLock::new();

/// Monitor loop iterations, labeled by watchdog.
pub static MONITOR_ITERATIONS: OnceLock<CounterVec> = OnceLock::new();

/// Time spent in convergence waits in seconds, labeled by wait kind.
pub static WAIT_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Handler outcomes, labeled by outcome.
pub static RUN_OUTCOMES: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Calling it again is harmless: the first set of
/// metrics stays in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let queue_depth = GaugeVec::new(
        Opts::new("watchdog_queue_depth", "Last observed queue depth"),
        &["watchdog"],
    )?;

    let workers_triggered = CounterVec::new(
        Opts::new("watchdog_workers_triggered_total", "Worker invocations requested"),
        &["watchdog", "phase"],
    )?;

    let workers_not_served = GaugeVec::new(
        Opts::new(
            "watchdog_workers_not_served",
            "Workers started but not fulfilled after the fulfillment wait",
        ),
        &["watchdog"],
    )?;

    let monitor_iterations = CounterVec::new(
        Opts::new("watchdog_monitor_iterations_total", "Monitor loop iterations"),
        &["watchdog"],
    )?;

    let wait_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "watchdog_wait_duration_seconds",
            "Time spent in convergence waits",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 60.0, 300.0]),
        &["wait"],
    )?;

    let run_outcomes = CounterVec::new(
        Opts::new("watchdog_run_outcomes_total", "Watchdog run outcomes"),
        &["outcome"],
    )?;

    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(workers_triggered.clone()))?;
    registry.register(Box::new(workers_not_served.clone()))?;
    registry.register(Box::new(monitor_iterations.clone()))?;
    registry.register(Box::new(wait_duration.clone()))?;
    registry.register(Box::new(run_outcomes.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = WORKERS_TRIGGERED.set(workers_triggered);
    let _ = WORKERS_NOT_SERVED.set(workers_not_served);
    let _ = MONITOR_ITERATIONS.set(monitor_iterations);
    let _ = WAIT_DURATION.set(wait_duration);
    let _ = RUN_OUTCOMES.set(run_outcomes);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
