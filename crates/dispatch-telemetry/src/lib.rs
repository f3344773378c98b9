//! # Dispatch Telemetry
//!
//! LGTM-stack observability for the task-dispatch orchestrator.
//!
//! ## Components
//!
//! - **L**oki: structured log aggregation
//! - **G**rafana: unified dashboards (configured separately)
//! - **T**empo: distributed tracing via OpenTelemetry
//! - **M**etrics: Prometheus metrics for Mimir
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dispatch_telemetry::{TelemetryConfig, init_telemetry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(config).await.expect("failed to init telemetry");
//!
//!     // Application code runs here; spans, logs, and metrics are collected.
//! }
//! ```

#![warn(missing_docs)]
#![allow(missing_docs)]

mod config;
mod logging;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use logging::StructuredLogger;
pub use metrics::{
    register_metrics, CallbackDeliveryTimer, MetricsHandle, CALLBACK_DELIVERIES_TOTAL,
    CALLBACK_DELIVERY_DURATION, NONCE_CACHE_SIZE, TASKS_ADMITTED_TOTAL, TASKS_REJECTED_TOTAL,
    TASKS_RUNNING, TASK_TERMINAL_TOTAL, WORKER_SPAWN_FAILURES_TOTAL, WORKSPACE_DISPOSAL_FAILURES,
};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),
    #[error("failed to initialize structured logger: {0}")]
    LoggingInit(String),
    #[error("failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
    #[error("invalid telemetry configuration: {0}")]
    Config(String),
}

/// Initialize the complete LGTM telemetry stack.
///
/// Returns a guard that must be held for the lifetime of the process. When
/// dropped, it flushes all pending traces.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics_handle = register_metrics()?;
    let tracing_guard = tracing_setup::init_tracing(&config).await?;
    let _logging_guard = logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        _tracing: tracing_guard,
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shut down.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("shutting down telemetry");
    }
}

/// Convenience macro for creating a span carrying the task id.
#[macro_export]
macro_rules! task_span {
    ($name:expr, $task_id:expr $(, $($field:tt)*)?) => {
        tracing::info_span!($name, task_id = %$task_id, $($($field)*)?)
    };
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "task-dispatcher");
    }
}
