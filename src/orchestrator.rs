//! The typed orchestrator seam (list/get/patch of Deployment, ReplicaSet,
//! Pod, Namespace, Alert) the reconciliation core is built against, plus
//! the production `kube` implementation and the dry-run transport decorator.
use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Namespace, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::Selector;
use serde_json::json;
use tracing::{debug, warn};

use crate::resources::Alert;
use crate::{Error, Result};

const FIELD_MANAGER: &str = "babylon";

/// A merge-patch against a Deployment's `.metadata.annotations`,
/// `.spec.replicas` and/or `.spec.template.spec`.
///
/// Per spec.md's at-most-one-strategy invariant, `replicas` and
/// `template_spec` are never both set by the executioner in the same
/// patch, but the type doesn't need to enforce that itself.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub annotations: BTreeMap<String, String>,
    pub replicas: Option<i32>,
    pub template_spec: Option<PodSpec>,
}

impl DeploymentPatch {
    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    pub fn clear_annotation(mut self, key: &str) -> Self {
        self.annotations.insert(key.to_string(), String::new());
        self
    }

    fn to_merge_patch(&self) -> serde_json::Value {
        let mut spec = serde_json::Map::new();
        if let Some(replicas) = self.replicas {
            spec.insert("replicas".to_string(), json!(replicas));
        }
        if let Some(template_spec) = &self.template_spec {
            spec.insert(
                "template".to_string(),
                json!({ "spec": template_spec }),
            );
        }
        // An empty string is `clear_annotation`'s sentinel for deletion; a
        // JSON Merge Patch (RFC 7396) deletes a key on an explicit `null`,
        // never on an empty string.
        let mut annotations = serde_json::Map::new();
        for (k, v) in &self.annotations {
            annotations.insert(
                k.clone(),
                if v.is_empty() { serde_json::Value::Null } else { json!(v) },
            );
        }
        json!({
            "metadata": { "annotations": annotations },
            "spec": spec,
        })
    }
}

fn selector_of(selector: &LabelSelector) -> Selector {
    selector
        .clone()
        .try_into()
        .unwrap_or_else(|_| Selector::default())
}

/// Narrow typed interface to the cluster. Exists so the reconciliation
/// core never depends on `kube::Client` directly and tests can substitute
/// an in-memory double.
#[async_trait]
pub trait OrchestratorClient: Clone + Send + Sync + 'static {
    async fn list_deployments(&self) -> Result<Vec<Deployment>>;
    async fn list_replicasets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<ReplicaSet>>;
    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>>;
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;
    async fn list_alerts(&self, namespace: &str) -> Result<Vec<Alert>>;
    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &DeploymentPatch) -> Result<()>;
}

/// Production implementation, backed by a live `kube::Client`.
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    pub async fn try_default() -> Result<Self> {
        let client = kube::Client::try_default().await.map_err(Error::Orchestrator)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl OrchestratorClient for KubeClient {
    async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(Error::Orchestrator)?;
        Ok(list.items)
    }

    async fn list_replicasets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<ReplicaSet>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels_from(&selector_of(selector));
        let list = api.list(&lp).await.map_err(Error::Orchestrator)?;
        Ok(list.items)
    }

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels_from(&selector_of(selector));
        let list = api.list(&lp).await.map_err(Error::Orchestrator)?;
        Ok(list.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get(name).await.map_err(Error::Orchestrator)
    }

    async fn list_alerts(&self, namespace: &str) -> Result<Vec<Alert>> {
        let api: Api<Alert> = Api::namespaced(self.client.clone(), namespace);
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(e) => {
                debug!("no Alert resources available in {namespace}: {e}");
                Ok(vec![])
            }
        }
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &DeploymentPatch) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let body = patch.to_merge_patch();
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&body))
            .await
            .map_err(Error::Orchestrator)?;
        Ok(())
    }
}

/// Wraps any [`OrchestratorClient`] and drops writes, per the dry-run
/// invariant: reads pass through unchanged, patches succeed silently.
#[derive(Clone)]
pub struct DryRunClient<C> {
    inner: C,
}

impl<C> DryRunClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: OrchestratorClient> OrchestratorClient for DryRunClient<C> {
    async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        self.inner.list_deployments().await
    }

    async fn list_replicasets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<ReplicaSet>> {
        self.inner.list_replicasets(namespace, selector).await
    }

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        self.inner.list_pods(namespace, selector).await
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.inner.get_namespace(name).await
    }

    async fn list_alerts(&self, namespace: &str) -> Result<Vec<Alert>> {
        self.inner.list_alerts(namespace).await
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, _patch: &DeploymentPatch) -> Result<()> {
        warn!("dry-run: would patch {namespace}/{name}");
        Ok(())
    }
}
