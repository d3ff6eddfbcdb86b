//! The healing control loop
//!
//! Each cycle fetches and classifies the reactive window, forecasts memory
//! and disk, evaluates the rules and dispatches the resulting actions.
//! Cycles run one at a time. A failing stage is logged and recorded but
//! never aborts the cycle; it just contributes no action.

use crate::context::ServiceContext;
use crate::decision::{CycleObservations, DecisionEngine};
use crate::dispatch::{ActuationDispatcher, DispatchOutcome};
use crate::error::{HealerError, HealerResult};
use crate::health::{Component, ComponentStatus, HealthRegistry};
use crate::models::DecisionSnapshot;
use crate::observability::{HealerMetrics, StructuredLogger};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Recommended polling range; outside it the loop still runs
pub const MIN_RECOMMENDED_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_RECOMMENDED_INTERVAL: Duration = Duration::from_secs(40);

/// Everything one cycle observed, decided and did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub observations: CycleObservations,
    pub actions: DecisionSnapshot,
    pub outcomes: Vec<DispatchOutcome>,
}

impl CycleReport {
    /// Stages that ended in an error this cycle
    pub fn failed_stages(&self) -> usize {
        [
            self.observations.detection.is_err(),
            self.observations.memory.is_err(),
            self.observations.disk.is_err(),
        ]
        .into_iter()
        .filter(|failed| *failed)
        .count()
    }

    pub fn failed_actions(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded()).count()
    }
}

/// Sequential poll, evaluate, dispatch loop
pub struct ControlLoop {
    ctx: Arc<ServiceContext>,
    engine: DecisionEngine,
    dispatcher: ActuationDispatcher,
    interval: Duration,
    health: HealthRegistry,
    metrics: HealerMetrics,
    logger: StructuredLogger,
}

impl ControlLoop {
    pub fn new(
        ctx: Arc<ServiceContext>,
        engine: DecisionEngine,
        dispatcher: ActuationDispatcher,
        interval: Duration,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        if interval < MIN_RECOMMENDED_INTERVAL || interval > MAX_RECOMMENDED_INTERVAL {
            warn!(
                interval_secs = interval.as_secs(),
                "Poll interval outside the recommended 10-40s range"
            );
        }
        Self {
            ctx,
            engine,
            dispatcher,
            interval,
            health,
            metrics: HealerMetrics::new(),
            logger,
        }
    }

    /// Run cycles until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            dry_run = self.dispatcher.is_dry_run(),
            "Starting control loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    cycle += 1;

                    let report = self.run_cycle().await;

                    let elapsed = start.elapsed();
                    self.metrics.observe_cycle_latency(elapsed.as_secs_f64());
                    self.logger.log_cycle(
                        cycle,
                        report.actions.len(),
                        report.failed_stages(),
                        elapsed.as_millis(),
                    );

                    // Sleep a full interval after each cycle, even one that overran
                    ticker.reset();
                }
                _ = shutdown.recv() => {
                    info!(cycles = cycle, "Shutting down control loop");
                    break;
                }
            }
        }
    }

    /// One full cycle; never fails, stage errors are carried in the report
    pub async fn run_cycle(&self) -> CycleReport {
        let detection = self
            .stage("detect", Component::Detector, self.ctx.detect_live())
            .await;
        if let Ok(detected) = &detection {
            self.metrics.set_anomalies_in_window(detected.anomaly_count);
            if detected.anomaly_count > 0 {
                self.logger.log_anomaly(
                    detected.current_value,
                    detected.anomaly_count,
                    detected.labels.len(),
                );
            }
        }

        let memory = self
            .stage(
                "memory_forecast",
                Component::MemoryForecast,
                self.ctx.forecast_memory(),
            )
            .await;
        let disk = self
            .stage(
                "disk_forecast",
                Component::DiskForecast,
                self.ctx.forecast_disk(),
            )
            .await;

        let observations = CycleObservations {
            detection,
            memory,
            disk,
        };
        self.update_upstream_health(&observations).await;

        let actions = self.engine.evaluate(&observations);
        let outcomes = self.dispatch(&actions).await;

        CycleReport {
            observations,
            actions,
            outcomes,
        }
    }

    async fn stage<T>(
        &self,
        stage: &'static str,
        component: Component,
        fut: impl Future<Output = HealerResult<T>>,
    ) -> HealerResult<T> {
        let start = Instant::now();
        let result = fut.await;
        self.metrics
            .observe_stage_latency(stage, start.elapsed().as_secs_f64());

        match &result {
            Ok(_) => self.health.record_success(component).await,
            Err(e) => {
                self.metrics.inc_stage_error(stage, e);
                self.logger.log_stage_failure(stage, e);
                self.health.record_error(component, e).await;
            }
        }
        result
    }

    async fn update_upstream_health(&self, observations: &CycleObservations) {
        let errors = [
            observations.detection.as_ref().err(),
            observations.memory.as_ref().err(),
            observations.disk.as_ref().err(),
        ];
        let upstream_error = errors
            .into_iter()
            .flatten()
            .find(|e| matches!(e, HealerError::UpstreamUnavailable(_)));

        match upstream_error {
            Some(e) => {
                self.health
                    .record_failure(Component::Upstream, ComponentStatus::Unhealthy, e.to_string())
                    .await
            }
            None => self.health.record_success(Component::Upstream).await,
        }
    }

    async fn dispatch(&self, actions: &DecisionSnapshot) -> Vec<DispatchOutcome> {
        if actions.is_empty() {
            debug!("No remediation needed");
            self.health.record_success(Component::Dispatcher).await;
            return Vec::new();
        }

        let start = Instant::now();
        let outcomes = self.dispatcher.dispatch(actions).await;
        self.metrics
            .observe_stage_latency("dispatch", start.elapsed().as_secs_f64());

        for outcome in &outcomes {
            self.metrics.record_action(outcome);
            self.logger.log_action(outcome);
        }

        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        if failed == 0 {
            self.health.record_success(Component::Dispatcher).await;
        } else {
            self.health
                .record_failure(
                    Component::Dispatcher,
                    ComponentStatus::Degraded,
                    format!("{} of {} actions failed", failed, outcomes.len()),
                )
                .await;
        }
        outcomes
    }
}
