//! Notification-channel resolution, shared by the Failure Judge (streak
//! start) and the Executioner (remediation), per spec.md §4.4's three-step
//! fallback. `babylon_alerts` is a [`FeatureFlags`] toggle rather than a
//! plain bool so the seam stays swappable for a real flag client.
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use kube::Resource;

use crate::flags::FeatureFlags;
use crate::orchestrator::OrchestratorClient;
use crate::resources::{Alert, PLATFORM_ALERTS_CHANNEL_ANNOTATION, SLACK_CHANNEL_ANNOTATION};

pub const BABYLON_ALERTS_FLAG: &str = "babylon_alerts";

pub async fn resolve<C: OrchestratorClient>(
    client: &C,
    flags: &dyn FeatureFlags,
    default_channel: &str,
    d: &Deployment,
) -> String {
    let ns = d.meta().namespace.clone().unwrap_or_default();

    if flags.enabled(BABYLON_ALERTS_FLAG) {
        if let Ok(namespace) = client.get_namespace(&ns).await {
            if let Some(c) = namespace_annotation(&namespace, PLATFORM_ALERTS_CHANNEL_ANNOTATION) {
                return c;
            }
        }
        let mut alerts = client.list_alerts(&ns).await.unwrap_or_default();
        alerts.sort_by(|a: &Alert, b: &Alert| a.spec.channel.cmp(&b.spec.channel));
        if let Some(first) = alerts.into_iter().next() {
            return first.spec.channel;
        }
    }

    if let Ok(namespace) = client.get_namespace(&ns).await {
        if let Some(c) = namespace_annotation(&namespace, SLACK_CHANNEL_ANNOTATION) {
            return c;
        }
    }

    default_channel.to_string()
}

fn namespace_annotation(ns: &Namespace, key: &str) -> Option<String> {
    let v = ns.meta().annotations.as_ref()?.get(key)?;
    if v.is_empty() {
        None
    } else {
        Some(v.clone())
    }
}
