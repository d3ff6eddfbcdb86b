//! Remediation dispatch to the cluster control plane
//!
//! Actions run in order, each bounded by its own timeout. A failed action is
//! recorded and the next one still runs. Nothing is verified afterwards: the
//! next cycle's fresh detection is the only feedback.

mod kubernetes;

pub use kubernetes::KubeControlPlane;

use crate::error::{HealerError, HealerResult};
use crate::models::{ActionKind, RemediationAction};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Operations the healer may perform on the cluster
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Delete every pod matching `selector`; returns how many were deleted
    ///
    /// Terms keyed on `metadata.`, `spec.` or `status.` select pod fields,
    /// the rest select labels.
    async fn delete_pods(&self, namespace: &str, selector: &str) -> HealerResult<usize>;

    /// Trigger a rolling restart of the named workload
    async fn restart_workload(&self, namespace: &str, name: &str) -> HealerResult<()>;
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Budget for a single control plane call
    pub actuation_timeout: Duration,
    /// Log actions instead of performing them
    pub dry_run: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            actuation_timeout: Duration::from_secs(10),
            dry_run: false,
        }
    }
}

/// Result of dispatching one action
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub action: RemediationAction,
    pub result: HealerResult<()>,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_detail(&self) -> Option<String> {
        self.result.as_ref().err().map(|e| e.to_string())
    }
}

/// Executes remediation actions, fire-and-forget
#[derive(Clone)]
pub struct ActuationDispatcher {
    /// `None` only for a dry-run dispatcher built without a cluster
    control_plane: Option<Arc<dyn ControlPlane>>,
    config: DispatchConfig,
}

impl ActuationDispatcher {
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: DispatchConfig) -> Self {
        Self {
            control_plane: Some(control_plane),
            config,
        }
    }

    /// A dispatcher that only logs, needing no cluster connection
    pub fn dry_run(config: DispatchConfig) -> Self {
        Self {
            control_plane: None,
            config: DispatchConfig {
                dry_run: true,
                ..config
            },
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run || self.control_plane.is_none()
    }

    /// Dispatch `actions` in order, one outcome per action
    pub async fn dispatch(&self, actions: &[RemediationAction]) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let result = self.dispatch_one(action).await;
            outcomes.push(DispatchOutcome {
                action: action.clone(),
                result,
            });
        }
        outcomes
    }

    async fn dispatch_one(&self, action: &RemediationAction) -> HealerResult<()> {
        let control_plane = match &self.control_plane {
            Some(plane) if !self.config.dry_run => plane,
            _ => {
                info!(
                    kind = %action.kind,
                    target = %action.target,
                    reason = %action.reason,
                    "Dry run, skipping actuation"
                );
                return Ok(());
            }
        };

        let namespace = &action.target.namespace;
        let selector = &action.target.selector;
        let call = async {
            match action.kind {
                ActionKind::DeletePods => {
                    let deleted = control_plane.delete_pods(namespace, selector).await?;
                    debug!(namespace = %namespace, selector = %selector, deleted, "Pods deleted");
                    Ok(())
                }
                ActionKind::RestartWorkload | ActionKind::Cleanup => {
                    control_plane.restart_workload(namespace, selector).await
                }
            }
        };

        match tokio::time::timeout(self.config.actuation_timeout, call).await {
            Ok(result) => result.map_err(|e| match e {
                HealerError::ActuationFailure(_) => e,
                other => HealerError::ActuationFailure(other.to_string()),
            }),
            Err(_) => Err(HealerError::Timeout {
                stage: "actuation",
                after: self.config.actuation_timeout,
            }),
        }
    }
}
