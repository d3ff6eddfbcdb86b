//! Threshold rules that turn detections and forecasts into actions
//!
//! The engine keeps no state between cycles. Each rule looks only at this
//! cycle's stage outcome; a failed stage never fires its rule. There is no
//! cooldown, so a persisting condition re-emits the same action every cycle.

use crate::error::{HealerError, HealerResult};
use crate::models::{
    ActionKind, DecisionSnapshot, DetectionResult, ForecastResult, RemediationAction,
    TargetRef, TriggerSource,
};

pub const REASON_CPU_ANOMALY: &str = "cpu-anomaly";
pub const REASON_MEMORY_LEAK: &str = "memory-leak-trend";
pub const REASON_DISK_CAPACITY: &str = "disk-capacity";

/// Rule thresholds and targets
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Memory rule fires when the growth ratio is strictly above this
    pub growth_threshold: f64,
    /// Disk rule fires when current usage (percent) is strictly above this
    pub capacity_threshold: f64,
    /// Disk rule fires when the crossing ETA is strictly below this many days
    pub eta_threshold_days: f64,
    /// Action the disk rule emits: `Cleanup` or `RestartWorkload`
    pub disk_action: ActionKind,
    pub reactive_target: TargetRef,
    pub leaking_target: TargetRef,
    pub storage_target: TargetRef,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            growth_threshold: 1.2,
            capacity_threshold: 70.0,
            eta_threshold_days: 1.0,
            disk_action: ActionKind::Cleanup,
            reactive_target: TargetRef::new("monitoring", "metadata.name=cpu-chaos-test"),
            leaking_target: TargetRef::new("default", "memory-leak-app"),
            storage_target: TargetRef::new("default", "storage-app"),
        }
    }
}

impl RuleConfig {
    pub fn validate(&self) -> HealerResult<()> {
        if !(self.growth_threshold > 0.0 && self.growth_threshold.is_finite()) {
            return Err(HealerError::InvalidConfig(format!(
                "growth_threshold must be positive, got {}",
                self.growth_threshold
            )));
        }
        if !self.capacity_threshold.is_finite() || !self.eta_threshold_days.is_finite() {
            return Err(HealerError::InvalidConfig(
                "disk thresholds must be finite".to_string(),
            ));
        }
        if self.disk_action == ActionKind::DeletePods {
            return Err(HealerError::InvalidConfig(
                "disk_action must be cleanup or restart_workload".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stage outcomes of one cycle, as seen by the rules
#[derive(Debug, Clone)]
pub struct CycleObservations {
    pub detection: HealerResult<DetectionResult>,
    pub memory: HealerResult<ForecastResult>,
    pub disk: HealerResult<ForecastResult>,
}

/// Stateless rule evaluator
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    config: RuleConfig,
}

impl DecisionEngine {
    pub fn new(config: RuleConfig) -> HealerResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Evaluate all rules; output order is always reactive, memory, disk
    pub fn evaluate(&self, observations: &CycleObservations) -> DecisionSnapshot {
        [
            self.reactive_rule(&observations.detection),
            self.memory_rule(&observations.memory),
            self.disk_rule(&observations.disk),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Any anomalous point in the reactive window
    pub fn reactive_rule(
        &self,
        detection: &HealerResult<DetectionResult>,
    ) -> Option<RemediationAction> {
        let detection = detection.as_ref().ok()?;
        (detection.anomaly_count > 0).then(|| RemediationAction {
            kind: ActionKind::DeletePods,
            target: self.config.reactive_target.clone(),
            reason: REASON_CPU_ANOMALY.to_string(),
            triggered_by: TriggerSource::Reactive,
        })
    }

    /// Projected memory growth above the leak threshold
    pub fn memory_rule(&self, memory: &HealerResult<ForecastResult>) -> Option<RemediationAction> {
        let ratio = memory.as_ref().ok()?.growth_ratio?;
        (ratio > self.config.growth_threshold).then(|| RemediationAction {
            kind: ActionKind::RestartWorkload,
            target: self.config.leaking_target.clone(),
            reason: REASON_MEMORY_LEAK.to_string(),
            triggered_by: TriggerSource::MemoryTrend,
        })
    }

    /// Disk already past capacity, or forecast to hit critical within the ETA window
    pub fn disk_rule(&self, disk: &HealerResult<ForecastResult>) -> Option<RemediationAction> {
        let disk = disk.as_ref().ok()?;
        let over_capacity = disk.history_tail_value > self.config.capacity_threshold;
        let crossing_soon = disk
            .threshold_crossing_eta
            .is_sooner_than(self.config.eta_threshold_days);

        (over_capacity || crossing_soon).then(|| RemediationAction {
            kind: self.config.disk_action,
            target: self.config.storage_target.clone(),
            reason: REASON_DISK_CAPACITY.to_string(),
            triggered_by: TriggerSource::DiskCapacity,
        })
    }
}
