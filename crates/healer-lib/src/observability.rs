//! Observability infrastructure for the healer
//!
//! Provides:
//! - Prometheus metrics (cycle and stage latency, stage errors, dispatched actions)
//! - Structured JSON logging with tracing

use crate::dispatch::DispatchOutcome;
use crate::error::HealerError;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle and stage latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<HealerMetricsInner> = OnceLock::new();

struct HealerMetricsInner {
    cycle_latency_seconds: Histogram,
    stage_latency_seconds: HistogramVec,
    stage_errors: IntCounterVec,
    cycles: IntCounter,
    anomalies_in_window: IntGauge,
    actions: IntCounterVec,
    model_loaded: IntGauge,
}

impl HealerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "self_healer_cycle_latency_seconds",
                "Time spent on one full poll-evaluate-dispatch cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            stage_latency_seconds: register_histogram_vec!(
                "self_healer_stage_latency_seconds",
                "Time spent in each cycle stage",
                &["stage"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_latency_seconds"),

            stage_errors: register_int_counter_vec!(
                "self_healer_stage_errors_total",
                "Stage failures by stage and error kind",
                &["stage", "kind"]
            )
            .expect("Failed to register stage_errors_total"),

            cycles: register_int_counter!(
                "self_healer_cycles_total",
                "Completed control loop cycles"
            )
            .expect("Failed to register cycles_total"),

            anomalies_in_window: register_int_gauge!(
                "self_healer_anomalies_in_window",
                "Anomalous samples in the latest reactive window"
            )
            .expect("Failed to register anomalies_in_window"),

            actions: register_int_counter_vec!(
                "self_healer_actions_total",
                "Dispatched remediation actions by kind and outcome",
                &["kind", "outcome"]
            )
            .expect("Failed to register actions_total"),

            model_loaded: register_int_gauge!(
                "self_healer_model_loaded",
                "Whether the detection model is loaded (1) or not (0)"
            )
            .expect("Failed to register model_loaded"),
        }
    }
}

/// Healer metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct HealerMetrics {
    _private: (),
}

impl Default for HealerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HealerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(HealerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &HealerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
        self.inner().cycles.inc();
    }

    pub fn observe_stage_latency(&self, stage: &str, duration_secs: f64) {
        self.inner()
            .stage_latency_seconds
            .with_label_values(&[stage])
            .observe(duration_secs);
    }

    pub fn inc_stage_error(&self, stage: &str, error: &HealerError) {
        self.inner()
            .stage_errors
            .with_label_values(&[stage, error.kind()])
            .inc();
    }

    pub fn set_anomalies_in_window(&self, count: usize) {
        self.inner().anomalies_in_window.set(count as i64);
    }

    pub fn record_action(&self, outcome: &DispatchOutcome) {
        let result = if outcome.succeeded() { "success" } else { "failure" };
        self.inner()
            .actions
            .with_label_values(&[outcome.action.kind.as_str(), result])
            .inc();
    }

    pub fn set_model_loaded(&self, loaded: bool) {
        self.inner().model_loaded.set(i64::from(loaded));
    }
}

/// Structured logger for healer events
///
/// Every event carries a stable `event` field so log pipelines can key on it.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log healer startup
    pub fn log_startup(&self, version: &str, model_version: Option<&str>, dry_run: bool) {
        info!(
            event = "healer_started",
            node = %self.node_name,
            healer_version = %version,
            model_version = model_version.unwrap_or("none"),
            dry_run = dry_run,
            "Self-healer started"
        );
    }

    /// Log healer shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "healer_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Self-healer shutting down"
        );
    }

    /// Log an anomalous reactive window
    pub fn log_anomaly(&self, current_value: f64, anomaly_count: usize, window_len: usize) {
        warn!(
            event = "anomaly_detected",
            node = %self.node_name,
            current_value = current_value,
            anomaly_count = anomaly_count,
            window_len = window_len,
            "CPU anomaly detected in reactive window"
        );
    }

    /// Log a failed stage; the cycle continues without it
    pub fn log_stage_failure(&self, stage: &str, error: &HealerError) {
        warn!(
            event = "stage_failed",
            node = %self.node_name,
            stage = %stage,
            error_kind = error.kind(),
            error = %error,
            "Cycle stage failed"
        );
    }

    /// Log the outcome of one dispatched action
    pub fn log_action(&self, outcome: &DispatchOutcome) {
        let action = &outcome.action;
        match &outcome.result {
            Ok(()) => info!(
                event = "action_dispatched",
                node = %self.node_name,
                kind = %action.kind,
                target = %action.target,
                reason = %action.reason,
                triggered_by = %action.triggered_by,
                "Remediation action dispatched"
            ),
            Err(e) => warn!(
                event = "action_failed",
                node = %self.node_name,
                kind = %action.kind,
                target = %action.target,
                reason = %action.reason,
                triggered_by = %action.triggered_by,
                error = %e,
                "Remediation action failed"
            ),
        }
    }

    /// Log a completed cycle
    pub fn log_cycle(&self, cycle: u64, actions: usize, failed_stages: usize, elapsed_ms: u128) {
        info!(
            event = "cycle_completed",
            node = %self.node_name,
            cycle = cycle,
            actions = actions,
            failed_stages = failed_stages,
            elapsed_ms = elapsed_ms as u64,
            "Control loop cycle complete"
        );
    }
}
