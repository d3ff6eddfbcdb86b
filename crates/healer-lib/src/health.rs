//! Component health tracking for the healer
//!
//! The control loop reports each stage's last outcome here; the API serves
//! the aggregate for liveness and readiness probes. Nothing on the decision
//! path reads it back.

use crate::error::HealerError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parts of the healer whose health is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Detector,
    MemoryForecast,
    DiskForecast,
    Dispatcher,
    Upstream,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Detector,
        Component::MemoryForecast,
        Component::DiskForecast,
        Component::Dispatcher,
        Component::Upstream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Detector => "detector",
            Component::MemoryForecast => "memory_forecast",
            Component::DiskForecast => "disk_forecast",
            Component::Dispatcher => "dispatcher",
            Component::Upstream => "upstream",
        }
    }

    /// The healer can still act without a model, but not without the
    /// metrics store or the control plane
    fn gates_readiness(&self) -> bool {
        matches!(self, Component::Upstream | Component::Dispatcher)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last attempt failed; the next cycle may recover
    Degraded,
    /// Cannot work until something outside the healer changes
    Unhealthy,
}

impl ComponentStatus {
    /// Status a stage error leaves its component in
    pub fn for_error(error: &HealerError) -> Self {
        match error {
            HealerError::ModelUnavailable | HealerError::ModelLoad(_) => {
                ComponentStatus::Unhealthy
            }
            _ => ComponentStatus::Degraded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failures in a row, reset by the next success
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check: Utc::now(),
        }
    }
}

/// Point-in-time view of every component
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Readiness response
#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct RegistryState {
    components: BTreeMap<Component, ComponentHealth>,
    started: bool,
}

/// Shared health registry; every component starts healthy
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        let components = Component::ALL
            .into_iter()
            .map(|c| (c, ComponentHealth::healthy()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                components,
                started: false,
            })),
        }
    }

    pub async fn record_success(&self, component: Component) {
        let mut state = self.state.write().await;
        state.components.insert(component, ComponentHealth::healthy());
    }

    pub async fn record_failure(
        &self,
        component: Component,
        status: ComponentStatus,
        message: impl Into<String>,
    ) {
        let mut state = self.state.write().await;
        let entry = state
            .components
            .entry(component)
            .or_insert_with(ComponentHealth::healthy);
        entry.status = status;
        entry.message = Some(message.into());
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_check = Utc::now();
    }

    /// Record a stage error with the status its kind implies
    pub async fn record_error(&self, component: Component, error: &HealerError) {
        self.record_failure(component, ComponentStatus::for_error(error), error.to_string())
            .await;
    }

    /// Flip once startup completes, and back on shutdown
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.started = ready;
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthSnapshot {
            status,
            components: state.components.clone(),
        }
    }

    /// Ready after startup while the store and the control plane are usable
    pub async fn readiness(&self) -> Readiness {
        let state = self.state.read().await;
        if !state.started {
            return Readiness {
                ready: false,
                reason: Some("Healer not yet initialized".to_string()),
            };
        }

        let blocking = state.components.iter().find(|(component, health)| {
            component.gates_readiness() && health.status == ComponentStatus::Unhealthy
        });
        match blocking {
            Some((component, health)) => Readiness {
                ready: false,
                reason: Some(format!(
                    "{} unhealthy: {}",
                    component,
                    health.message.as_deref().unwrap_or("no detail")
                )),
            },
            None => Readiness {
                ready: true,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_components_start_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.snapshot().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), 5);
        assert!(health
            .components
            .values()
            .all(|c| c.status == ComponentStatus::Healthy && c.consecutive_failures == 0));
    }

    #[tokio::test]
    async fn test_stage_errors_map_to_status() {
        let registry = HealthRegistry::new();

        registry
            .record_error(
                Component::MemoryForecast,
                &HealerError::InsufficientHistory {
                    samples: 1,
                    required: 2,
                },
            )
            .await;
        let health = registry.snapshot().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.components[&Component::MemoryForecast]
            .message
            .as_deref()
            .unwrap()
            .contains("insufficient history"));

        registry
            .record_error(Component::Detector, &HealerError::ModelUnavailable)
            .await;
        assert_eq!(registry.snapshot().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_failure_streak_resets_on_success() {
        let registry = HealthRegistry::new();
        let timeout = HealerError::Timeout {
            stage: "disk_forecast",
            after: std::time::Duration::from_secs(30),
        };

        registry.record_error(Component::DiskForecast, &timeout).await;
        registry.record_error(Component::DiskForecast, &timeout).await;
        let health = registry.snapshot().await;
        assert_eq!(health.components[&Component::DiskForecast].consecutive_failures, 2);

        registry.record_success(Component::DiskForecast).await;
        let health = registry.snapshot().await;
        assert_eq!(health.components[&Component::DiskForecast].consecutive_failures, 0);
        assert_eq!(health.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_components_serialize_by_name() {
        let registry = HealthRegistry::new();
        let json = serde_json::to_value(registry.snapshot().await).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"]["memory_forecast"]["status"], "healthy");
        assert!(json["components"]["upstream"].get("message").is_none());
    }

    #[tokio::test]
    async fn test_readiness_not_ready_before_startup() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_follows_upstream_not_detector() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;

        registry
            .record_error(Component::Detector, &HealerError::ModelUnavailable)
            .await;
        assert!(registry.readiness().await.ready);

        registry
            .record_failure(Component::Upstream, ComponentStatus::Unhealthy, "connection refused")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("upstream unhealthy: connection refused")
        );
    }
}
