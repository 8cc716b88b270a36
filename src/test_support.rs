//! In-memory `OrchestratorClient` double, keyed by (kind, namespace, name),
//! used by the judge/executioner/controller unit tests. Mirrors the shape
//! of the upstream project's table-driven tests without a live cluster.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::Resource;

use crate::orchestrator::{DeploymentPatch, OrchestratorClient};
use crate::resources::{Alert, REVISION_ANNOTATION};
use crate::{Error, Result};

#[derive(Default)]
struct Store {
    deployments: HashMap<(String, String), Deployment>,
    replicasets: HashMap<String, Vec<ReplicaSet>>,
    pods: HashMap<String, Vec<Pod>>,
    namespaces: HashMap<String, Namespace>,
    alerts: HashMap<String, Vec<Alert>>,
    patches: Vec<(String, String, DeploymentPatch)>,
}

/// Cheap to `Clone` — every handle shares the same backing store, the same
/// way a `kube::Client` handle does.
#[derive(Clone, Default)]
pub struct FakeClient {
    store: Arc<Mutex<Store>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_deployment(&self, d: Deployment) {
        let ns = d.meta().namespace.clone().unwrap_or_default();
        let name = d.meta().name.clone().unwrap_or_default();
        self.store.lock().unwrap().deployments.insert((ns, name), d);
    }

    pub fn insert_replicaset(&self, ns: &str, rs: ReplicaSet) {
        self.store
            .lock()
            .unwrap()
            .replicasets
            .entry(ns.to_string())
            .or_default()
            .push(rs);
    }

    pub fn insert_pod(&self, ns: &str, pod: Pod) {
        self.store.lock().unwrap().pods.entry(ns.to_string()).or_default().push(pod);
    }

    pub fn insert_namespace(&self, ns: Namespace) {
        let name = ns.meta().name.clone().unwrap_or_default();
        self.store.lock().unwrap().namespaces.insert(name, ns);
    }

    pub fn insert_alert(&self, ns: &str, alert: Alert) {
        self.store.lock().unwrap().alerts.entry(ns.to_string()).or_default().push(alert);
    }

    pub fn get_deployment(&self, ns: &str, name: &str) -> Option<Deployment> {
        self.store
            .lock()
            .unwrap()
            .deployments
            .get(&(ns.to_string(), name.to_string()))
            .cloned()
    }

    pub fn patches(&self) -> Vec<(String, String, DeploymentPatch)> {
        self.store.lock().unwrap().patches.clone()
    }

    pub fn patch_count(&self) -> usize {
        self.store.lock().unwrap().patches.len()
    }
}

fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    selector
        .match_labels
        .as_ref()
        .into_iter()
        .flatten()
        .all(|(k, v)| labels.get(k) == Some(v))
}

fn revision_of<R: Resource<DynamicType = ()>>(r: &R) -> i64 {
    r.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl OrchestratorClient for FakeClient {
    async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        Ok(self.store.lock().unwrap().deployments.values().cloned().collect())
    }

    async fn list_replicasets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<ReplicaSet>> {
        let store = self.store.lock().unwrap();
        let mut items: Vec<ReplicaSet> = store
            .replicasets
            .get(namespace)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|rs| selector_matches(selector, rs.meta().labels.as_ref().unwrap_or(&BTreeMap::new())))
            .collect();
        // Deterministic for tests: descending revision, as spec.md's design
        // notes allow implementers to sort by for reproducibility.
        items.sort_by(|a, b| revision_of(b).cmp(&revision_of(a)));
        Ok(items)
    }

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .pods
            .get(namespace)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|p| selector_matches(selector, p.meta().labels.as_ref().unwrap_or(&BTreeMap::new())))
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.store
            .lock()
            .unwrap()
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| Error::KubeInvariant(format!("namespace {name} not found")))
    }

    async fn list_alerts(&self, namespace: &str) -> Result<Vec<Alert>> {
        Ok(self.store.lock().unwrap().alerts.get(namespace).cloned().unwrap_or_default())
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &DeploymentPatch) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        if let Some(d) = store.deployments.get_mut(&key) {
            let annotations = d.meta_mut().annotations.get_or_insert_with(Default::default);
            for (k, v) in &patch.annotations {
                if v.is_empty() {
                    annotations.remove(k);
                } else {
                    annotations.insert(k.clone(), v.clone());
                }
            }
            if let Some(spec) = d.spec.as_mut() {
                if let Some(replicas) = patch.replicas {
                    spec.replicas = Some(replicas);
                }
                if let Some(template_spec) = &patch.template_spec {
                    spec.template.spec = Some(template_spec.clone());
                }
            }
        }
        store.patches.push((namespace.to_string(), name.to_string(), patch.clone()));
        Ok(())
    }
}
