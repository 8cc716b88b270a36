//! Clean-up Judge: filters failing deployments down to the set eligible
//! for remediation right now. Performs no side effects.
//!
//! Grounded in `original_source/pkg/criteria/cleanup.go`'s `CleanUpJudge`.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::Resource;
use tracing::warn;

use crate::config::Config;
use crate::resources::{FAILURE_DETECTED_ANNOTATION, GRACE_PERIOD_ANNOTATION};

pub struct CleanUpJudge {
    config: Arc<Config>,
}

impl CleanUpJudge {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// From spec.md §4.2: namespace policy, then the streak-age filter.
    pub fn judge(&self, deployments: Vec<Deployment>) -> Vec<Deployment> {
        deployments.into_iter().filter(|d| self.eligible(d)).collect()
    }

    fn eligible(&self, d: &Deployment) -> bool {
        let ns = d.meta().namespace.clone().unwrap_or_default();
        let name = d.meta().name.clone().unwrap_or_default();

        if !self.config.is_namespace_allowed(&ns) {
            return false;
        }

        let Some(raw) = annotation(d, FAILURE_DETECTED_ANNOTATION) else {
            // No timestamp, no clock started.
            return false;
        };

        let detected = match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!("{ns}/{name}: unparseable {FAILURE_DETECTED_ANNOTATION}={raw:?}: {e}");
                return false;
            }
        };

        let grace = grace_duration(d, self.config.grace_period);
        let threshold = grace + self.config.notification_delay;
        let elapsed = Utc::now().signed_duration_since(detected);
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        elapsed >= threshold
    }
}

pub(crate) fn grace_duration(d: &Deployment, default: Duration) -> Duration {
    annotation(d, GRACE_PERIOD_ANNOTATION)
        .and_then(|s| parse_duration::parse(s).ok())
        .unwrap_or(default)
}

fn annotation<'a>(d: &'a Deployment, key: &str) -> Option<&'a str> {
    d.meta().annotations.as_ref()?.get(key).map(String::as_str)
}
