//! Kubernetes control plane adapter
//!
//! Pod deletion goes through a selector-scoped delete-collection; restarts
//! patch the Deployment's pod template annotation the same way
//! `kubectl rollout restart` does.

use super::ControlPlane;
use crate::error::{HealerError, HealerResult};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::Client;
use tracing::info;

/// Annotation whose change rolls every pod of a Deployment
const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Selector keys the API server evaluates as pod fields, not labels
const FIELD_PREFIXES: [&str; 3] = ["metadata.", "spec.", "status."];

/// Split a pod selector into its label and field parts
///
/// `metadata.name=cpu-chaos-test` targets one pod by name, while
/// `app=web,status.phase=Running` mixes both kinds.
fn pod_list_params(selector: &str) -> ListParams {
    let (fields, labels): (Vec<&str>, Vec<&str>) = selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .partition(|term| FIELD_PREFIXES.iter().any(|p| term.starts_with(p)));

    let mut params = ListParams::default();
    if !labels.is_empty() {
        params = params.labels(&labels.join(","));
    }
    if !fields.is_empty() {
        params = params.fields(&fields.join(","));
    }
    params
}

/// Control plane backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> anyhow::Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn delete_pods(&self, namespace: &str, selector: &str) -> HealerResult<usize> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = pod_list_params(selector);

        let deleted = pods
            .delete_collection(&DeleteParams::default(), &params)
            .await
            .map_err(|e| {
                HealerError::ActuationFailure(format!(
                    "delete pods {}/{}: {}",
                    namespace, selector, e
                ))
            })?
            .map_left(|list| list.items.len())
            .left_or(0);

        info!(
            namespace = %namespace,
            selector = %selector,
            deleted,
            "Deleted matching pods"
        );
        Ok(deleted)
    }

    async fn restart_workload(&self, namespace: &str, name: &str) -> HealerResult<()> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            RESTARTED_AT_ANNOTATION: Utc::now().to_rfc3339()
                        }
                    }
                }
            }
        });

        deployments
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                HealerError::ActuationFailure(format!("restart {}/{}: {}", namespace, name, e))
            })?;

        info!(namespace = %namespace, deployment = %name, "Triggered rolling restart");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_name_is_a_field_selector() {
        let params = pod_list_params("metadata.name=cpu-chaos-test");
        assert_eq!(params.field_selector.as_deref(), Some("metadata.name=cpu-chaos-test"));
        assert_eq!(params.label_selector, None);
    }

    #[test]
    fn test_mixed_selector_is_split() {
        let params = pod_list_params("app=web, status.phase=Running,tier in (front)");
        assert_eq!(params.label_selector.as_deref(), Some("app=web,tier in (front)"));
        assert_eq!(params.field_selector.as_deref(), Some("status.phase=Running"));
    }

    #[test]
    fn test_prefixed_label_key_stays_a_label() {
        let params = pod_list_params("app.kubernetes.io/name=api");
        assert_eq!(params.label_selector.as_deref(), Some("app.kubernetes.io/name=api"));
        assert_eq!(params.field_selector, None);
    }
}
