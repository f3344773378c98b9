//! Prometheus metrics for the task-dispatch orchestrator.
//!
//! Metric names follow the convention `dispatch_<area>_<metric>_<unit>`.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total task submissions that were admitted.
    pub static ref TASKS_ADMITTED_TOTAL: Counter = Counter::new(
        "dispatch_tasks_admitted_total",
        "Total number of task submissions admitted"
    ).expect("metric creation failed");

    /// Total task submissions rejected, labeled by reason.
    pub static ref TASKS_REJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("dispatch_tasks_rejected_total", "Total task submissions rejected"),
        &["reason"]
    ).expect("metric creation failed");

    /// Tasks currently in the running state.
    pub static ref TASKS_RUNNING: Gauge = Gauge::new(
        "dispatch_tasks_running",
        "Number of tasks currently running"
    ).expect("metric creation failed");

    /// Terminal outcomes, labeled by status.
    pub static ref TASK_TERMINAL_TOTAL: CounterVec = CounterVec::new(
        Opts::new("dispatch_task_terminal_total", "Total tasks reaching a terminal state"),
        &["status"]
    ).expect("metric creation failed");

    /// Worker spawn failures.
    pub static ref WORKER_SPAWN_FAILURES_TOTAL: Counter = Counter::new(
        "dispatch_worker_spawn_failures_total",
        "Total worker subprocess spawn failures"
    ).expect("metric creation failed");

    /// Workspace disposal failures (non-fatal, logged and leaked).
    pub static ref WORKSPACE_DISPOSAL_FAILURES: Counter = Counter::new(
        "dispatch_workspace_disposal_failures_total",
        "Total workspace disposal failures"
    ).expect("metric creation failed");

    /// Current nonce cache size.
    pub static ref NONCE_CACHE_SIZE: Gauge = Gauge::new(
        "dispatch_nonce_cache_size",
        "Current number of entries in the nonce replay cache"
    ).expect("metric creation failed");

    /// Callback deliveries, labeled by outcome (accepted/permanent_reject/exhausted).
    pub static ref CALLBACK_DELIVERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("dispatch_callback_deliveries_total", "Total callback delivery attempts"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Callback delivery latency.
    pub static ref CALLBACK_DELIVERY_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "dispatch_callback_delivery_duration_seconds",
            "Time spent delivering a callback, per attempt"
        ).buckets(exponential_buckets(0.01, 2.0, 12).unwrap()),
        &["outcome"]
    ).expect("metric creation failed");
}

/// Handle for the metrics server.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(TASKS_ADMITTED_TOTAL.clone()),
        Box::new(TASKS_REJECTED_TOTAL.clone()),
        Box::new(TASKS_RUNNING.clone()),
        Box::new(TASK_TERMINAL_TOTAL.clone()),
        Box::new(WORKER_SPAWN_FAILURES_TOTAL.clone()),
        Box::new(WORKSPACE_DISPOSAL_FAILURES.clone()),
        Box::new(NONCE_CACHE_SIZE.clone()),
        Box::new(CALLBACK_DELIVERIES_TOTAL.clone()),
        Box::new(CALLBACK_DELIVERY_DURATION.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard that records a callback delivery's duration on drop.
pub struct CallbackDeliveryTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl CallbackDeliveryTimer {
    /// Start timing a callback delivery attempt with the given outcome label.
    pub fn start(outcome: &str) -> Self {
        Self {
            histogram: CALLBACK_DELIVERY_DURATION.with_label_values(&[outcome]),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for CallbackDeliveryTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // May fail if already registered from another test in-process; that's fine.
        let _ = register_metrics();
    }

    #[test]
    fn test_counter_increment() {
        TASKS_ADMITTED_TOTAL.inc();
        assert!(TASKS_ADMITTED_TOTAL.get() >= 1.0);
    }

    #[test]
    fn test_gauge_set() {
        TASKS_RUNNING.set(3.0);
        assert_eq!(TASKS_RUNNING.get(), 3.0);
    }

    #[test]
    fn test_callback_delivery_timer() {
        let _timer = CallbackDeliveryTimer::start("accepted");
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}
