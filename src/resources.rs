//! Control-plane annotation/label keys and the pod/container failure rules.
//!
//! Keys are bit-exact with the upstream Go project this system replaces.
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodStatus};
use kube::CustomResource;
use kube::Resource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const TEAM_LABEL: &str = "team";
pub const UNKNOWN_TEAM: &str = "unknown";

pub const FAILURE_DETECTED_ANNOTATION: &str = "babylon.nais.io/failure-detected";
pub const GRACE_PERIOD_ANNOTATION: &str = "babylon.nais.io/grace-period";
pub const STRATEGY_ANNOTATION: &str = "babylon.nais.io/strategy";
pub const ENABLED_LABEL: &str = "babylon.nais.io/enabled";
pub const CHANGE_CAUSE_ANNOTATION: &str = "kubernetes.io/change-cause";
pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";
pub const PLATFORM_ALERTS_CHANNEL_ANNOTATION: &str = "platform-alerts-channel";
pub const SLACK_CHANNEL_ANNOTATION: &str = "slack-channel";

pub const ROLLED_BACK_CAUSE: &str = "rolled back";
pub const SCALED_DOWN_CAUSE: &str = "scaled down";

pub const STRATEGY_ABORT_ROLLOUT: &str = "abort-rollout";
pub const STRATEGY_DOWNSCALE: &str = "downscale";

pub const IMAGE_PULL_BACK_OFF: &str = "ImagePullBackOff";
pub const ERR_IMAGE_PULL: &str = "ErrImagePull";
pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";
pub const CREATE_CONTAINER_CONFIG_ERROR: &str = "CreateContainerConfigError";

/// A cluster team's on-call/incident resource, consulted as a fallback
/// channel source when `babylon_alerts` is enabled.
///
/// Modelled as a custom resource the same way workload CRDs are modelled
/// elsewhere in the retrieval pack, even though no controller in this
/// crate writes it — it is read-only input discovered in a namespace.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "babylon.nais.io",
    version = "v1",
    kind = "Alert",
    plural = "alerts",
    namespaced
)]
pub struct AlertSpec {
    pub channel: String,
}

/// Outcome of classifying a single pod for the failure rules in the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodVerdict {
    Healthy,
    Failing(&'static str),
}

impl PodVerdict {
    pub fn is_failing(self) -> bool {
        matches!(self, PodVerdict::Failing(_))
    }

    pub fn reason(self) -> Option<&'static str> {
        match self {
            PodVerdict::Failing(r) => Some(r),
            PodVerdict::Healthy => None,
        }
    }
}

/// Apply the pod failure rules from the phase/container-state table.
///
/// `Succeeded`, `Failed`, and `Unknown` phases are never failing —
/// `Failed` is deliberately excluded even though it looks backwards;
/// changing it would materially widen the blast radius of remediation.
pub fn judge_pod(pod: &Pod, restart_threshold: i32) -> PodVerdict {
    let Some(status) = &pod.status else {
        return PodVerdict::Healthy;
    };
    match status.phase.as_deref() {
        Some("Running") => judge_running(status, restart_threshold),
        Some("Pending") => judge_pending(status),
        _ => PodVerdict::Healthy,
    }
}

fn judge_running(status: &PodStatus, restart_threshold: i32) -> PodVerdict {
    let statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    if statuses
        .iter()
        .any(|c| is_crash_loop_back_off(c, restart_threshold))
    {
        return PodVerdict::Failing(CRASH_LOOP_BACK_OFF);
    }
    PodVerdict::Healthy
}

fn judge_pending(status: &PodStatus) -> PodVerdict {
    let statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    if statuses.iter().any(is_image_pull_failure) {
        return PodVerdict::Failing(IMAGE_PULL_BACK_OFF);
    }
    if statuses.iter().any(is_create_container_config_error) {
        return PodVerdict::Failing(CREATE_CONTAINER_CONFIG_ERROR);
    }
    PodVerdict::Healthy
}

fn waiting_reason(c: &ContainerStatus) -> Option<&str> {
    c.state.as_ref()?.waiting.as_ref()?.reason.as_deref()
}

fn is_crash_loop_back_off(c: &ContainerStatus, restart_threshold: i32) -> bool {
    waiting_reason(c) == Some(CRASH_LOOP_BACK_OFF) && c.restart_count > restart_threshold
}

fn is_image_pull_failure(c: &ContainerStatus) -> bool {
    matches!(waiting_reason(c), Some(IMAGE_PULL_BACK_OFF) | Some(ERR_IMAGE_PULL))
}

fn is_create_container_config_error(c: &ContainerStatus) -> bool {
    waiting_reason(c) == Some(CREATE_CONTAINER_CONFIG_ERROR)
}

/// Whether any init container on the pod is failing (crash loop past
/// threshold, or stuck pulling its image), with the reason that tripped it.
pub fn judge_init_containers(pod: &Pod, restart_threshold: i32) -> PodVerdict {
    let Some(status) = &pod.status else {
        return PodVerdict::Healthy;
    };
    let statuses = status.init_container_statuses.as_deref().unwrap_or(&[]);
    for c in statuses {
        if is_crash_loop_back_off(c, restart_threshold) {
            return PodVerdict::Failing(CRASH_LOOP_BACK_OFF);
        }
        if is_image_pull_failure(c) {
            return PodVerdict::Failing(IMAGE_PULL_BACK_OFF);
        }
    }
    PodVerdict::Healthy
}

pub fn init_container_failing(pod: &Pod, restart_threshold: i32) -> bool {
    judge_init_containers(pod, restart_threshold).is_failing()
}

/// Owning team, read from the `team` label. Falls back to `"unknown"` —
/// the same default the metrics/history layer uses upstream.
pub fn team_of(deployment: &Deployment) -> String {
    deployment
        .meta()
        .labels
        .as_ref()
        .and_then(|l| l.get(TEAM_LABEL))
        .cloned()
        .unwrap_or_else(|| UNKNOWN_TEAM.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting};

    fn waiting_container(reason: &str, restarts: i32) -> ContainerStatus {
        ContainerStatus {
            restart_count: restarts,
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_with(phase: &str, statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(statuses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn crash_loop_below_threshold_is_healthy() {
        let pod = pod_with("Running", vec![waiting_container(CRASH_LOOP_BACK_OFF, 100)]);
        assert_eq!(judge_pod(&pod, 500), PodVerdict::Healthy);
    }

    #[test]
    fn crash_loop_at_threshold_is_healthy() {
        let pod = pod_with("Running", vec![waiting_container(CRASH_LOOP_BACK_OFF, 500)]);
        assert_eq!(judge_pod(&pod, 500), PodVerdict::Healthy);
    }

    #[test]
    fn crash_loop_above_threshold_is_failing() {
        let pod = pod_with("Running", vec![waiting_container(CRASH_LOOP_BACK_OFF, 501)]);
        assert!(judge_pod(&pod, 500).is_failing());
    }

    #[test]
    fn pending_image_pull_back_off_is_failing() {
        let pod = pod_with("Pending", vec![waiting_container(IMAGE_PULL_BACK_OFF, 0)]);
        assert_eq!(judge_pod(&pod, 500).reason(), Some(IMAGE_PULL_BACK_OFF));
    }

    #[test]
    fn pending_err_image_pull_is_failing() {
        let pod = pod_with("Pending", vec![waiting_container(ERR_IMAGE_PULL, 0)]);
        assert!(judge_pod(&pod, 500).is_failing());
    }

    #[test]
    fn pending_config_error_is_failing() {
        let pod = pod_with("Pending", vec![waiting_container(CREATE_CONTAINER_CONFIG_ERROR, 0)]);
        assert!(judge_pod(&pod, 500).is_failing());
    }

    #[test]
    fn failed_phase_is_not_failing() {
        let pod = pod_with("Failed", vec![]);
        assert_eq!(judge_pod(&pod, 500), PodVerdict::Healthy);
    }

    #[test]
    fn succeeded_and_unknown_are_not_failing() {
        assert_eq!(judge_pod(&pod_with("Succeeded", vec![]), 500), PodVerdict::Healthy);
        assert_eq!(judge_pod(&pod_with("Unknown", vec![]), 500), PodVerdict::Healthy);
    }

    #[test]
    fn init_container_crash_loop_detected() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                init_container_statuses: Some(vec![waiting_container(CRASH_LOOP_BACK_OFF, 501)]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(init_container_failing(&pod, 500));
    }
}
