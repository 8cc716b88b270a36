//! Failure Judge: classifies deployments failing/healthy per tick and
//! maintains the `failure-detected` streak annotation.
//!
//! Grounded in `original_source/pkg/core/core.go` and
//! `pkg/criteria/core.go`'s `DeploymentJudge`/`CoreCriteriaJudge`.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use kube::Resource;
use tracing::warn;

use crate::config::Config;
use crate::flags::FeatureFlags;
use crate::history::{FailingEvent, HistorySink};
use crate::metrics::Metrics;
use crate::orchestrator::{DeploymentPatch, OrchestratorClient};
use crate::resources::{judge_init_containers, judge_pod, team_of, FAILURE_DETECTED_ANNOTATION};
use crate::Result;

pub struct FailureJudge {
    resource_age: Duration,
    restart_threshold: i32,
    grace_period: Duration,
    notification_delay: Duration,
    cluster: String,
    default_slack_channel: String,
    metrics: Arc<Metrics>,
    history: Arc<dyn HistorySink>,
    flags: Arc<dyn FeatureFlags>,
}

impl FailureJudge {
    pub fn new(
        config: &Config,
        metrics: Arc<Metrics>,
        history: Arc<dyn HistorySink>,
        flags: Arc<dyn FeatureFlags>,
    ) -> Self {
        Self {
            resource_age: config.resource_age,
            restart_threshold: config.restart_threshold,
            grace_period: config.grace_period,
            notification_delay: config.notification_delay,
            cluster: config.cluster.clone(),
            default_slack_channel: config.default_slack_channel.clone(),
            metrics,
            history,
            flags,
        }
    }

    /// `Failing(deployments) -> list<Deployment>` from spec.md §4.1.
    pub async fn failing<C: OrchestratorClient>(
        &self,
        client: &C,
        deployments: Vec<Deployment>,
    ) -> Vec<Deployment> {
        let mut out = Vec::with_capacity(deployments.len());
        for mut d in deployments {
            let ns = d.meta().namespace.clone().unwrap_or_default();
            let name = d.meta().name.clone().unwrap_or_default();
            let team = team_of(&d);
            let flagged = annotation(&d, FAILURE_DETECTED_ANNOTATION).is_some();

            let verdict = match self.is_failing(client, &d).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("cannot judge {ns}/{name}, treating as healthy this tick: {e}");
                    None
                }
            };

            match verdict {
                Some(reasons) => {
                    for reason in &reasons {
                        self.metrics
                            .rule_activations
                            .with_label_values(&[&name, &ns, &team, reason])
                            .inc();
                    }
                    self.metrics
                        .deployment_status
                        .with_label_values(&[&name, &ns, &team])
                        .set(crate::metrics::STATUS_FAILING);
                    self.metrics
                        .last_updated
                        .with_label_values(&[&name, &ns])
                        .set(Utc::now().timestamp() as f64);

                    if flagged {
                        out.push(d);
                        continue;
                    }

                    let now = Utc::now();
                    let patch = DeploymentPatch::default()
                        .with_annotation(FAILURE_DETECTED_ANNOTATION, now.to_rfc3339());
                    match client.patch_deployment(&ns, &name, &patch).await {
                        Ok(()) => {
                            set_annotation(&mut d, FAILURE_DETECTED_ANNOTATION, now.to_rfc3339());
                            self.emit_streak_start(client, &d, &ns, &name, &team, now, reasons.first().copied())
                                .await;
                            out.push(d);
                        }
                        Err(e) => {
                            warn!("failed to flag {ns}/{name} as failing, skipping this tick: {e}");
                        }
                    }
                }
                None => {
                    if flagged {
                        let patch = DeploymentPatch::default().clear_annotation(FAILURE_DETECTED_ANNOTATION);
                        if let Err(e) = client.patch_deployment(&ns, &name, &patch).await {
                            warn!("failed to clear streak on {ns}/{name}: {e}");
                        } else {
                            self.metrics
                                .deployment_status
                                .with_label_values(&[&name, &ns, &team])
                                .set(crate::metrics::STATUS_OK);
                            self.metrics.grace_cutoff.with_label_values(&[&name, &ns]).set(0.0);
                            self.metrics
                                .last_updated
                                .with_label_values(&[&name, &ns])
                                .set(Utc::now().timestamp() as f64);
                        }
                    }
                }
            }
        }
        out
    }

    /// Notification-delay counter, grace-cutoff gauge, and history row
    /// emitted once, at the instant a streak begins.
    async fn emit_streak_start<C: OrchestratorClient>(
        &self,
        client: &C,
        d: &Deployment,
        ns: &str,
        name: &str,
        team: &str,
        detected: DateTime<Utc>,
        first_reason: Option<&str>,
    ) {
        let grace = crate::cleanup_judge::grace_duration(d, self.grace_period);
        let cutoff = detected
            + chrono::Duration::from_std(grace + self.notification_delay).unwrap_or(chrono::Duration::MAX);
        self.metrics
            .grace_cutoff
            .with_label_values(&[name, ns])
            .set(cutoff.timestamp() as f64);

        let channel = crate::channel::resolve(client, self.flags.as_ref(), &self.default_slack_channel, d).await;
        self.metrics
            .team_notifications
            .with_label_values(&[name, ns, team, &channel, &cutoff.timestamp().to_string()])
            .inc();
        self.metrics
            .slack_channel_info
            .with_label_values(&[name, team, &channel])
            .set(1.0);

        self.history.record_failing(FailingEvent {
            name: name.to_string(),
            namespace: ns.to_string(),
            reason: first_reason.unwrap_or("unknown").to_string(),
            team: team.to_string(),
            slack_channel: channel,
            cluster: self.cluster.clone(),
        });
    }

    async fn is_failing<C: OrchestratorClient>(
        &self,
        client: &C,
        d: &Deployment,
    ) -> Result<Option<Vec<&'static str>>> {
        let Some(created) = d.meta().creation_timestamp.as_ref() else {
            return Ok(None);
        };
        let age = Utc::now().signed_duration_since(created.0).num_seconds();
        if age < self.resource_age.as_secs() as i64 {
            return Ok(None);
        }

        let ns = d.meta().namespace.clone().unwrap_or_default();
        let Some(selector) = d.spec.as_ref().map(|s| s.selector.clone()) else {
            return Ok(None);
        };
        let replicasets = client.list_replicasets(&ns, &selector).await?;
        for rs in &replicasets {
            if let Some(reasons) = self.judge_replicaset(client, &ns, rs).await? {
                return Ok(Some(reasons));
            }
        }
        Ok(None)
    }

    async fn judge_replicaset<C: OrchestratorClient>(
        &self,
        client: &C,
        ns: &str,
        rs: &ReplicaSet,
    ) -> Result<Option<Vec<&'static str>>> {
        let Some(selector) = rs.spec.as_ref().map(|s| s.selector.clone()) else {
            return Ok(None);
        };
        let pods = client.list_pods(ns, &selector).await?;
        let mut reasons: Vec<&'static str> = Vec::new();

        let desired = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        if desired > 0 {
            let mut failing = 0usize;
            let mut pod_reasons = Vec::new();
            for p in &pods {
                let verdict = judge_pod(p, self.restart_threshold);
                if let Some(reason) = verdict.reason() {
                    failing += 1;
                    pod_reasons.push(reason);
                }
            }
            if failing == pods.len() {
                reasons.extend(pod_reasons);
            }
        }

        for p in &pods {
            if let Some(reason) = judge_init_containers(p, self.restart_threshold).reason() {
                reasons.push(reason);
            }
        }

        if reasons.is_empty() {
            Ok(None)
        } else {
            Ok(Some(reasons))
        }
    }
}

fn annotation<'a>(d: &'a Deployment, key: &str) -> Option<&'a str> {
    d.meta().annotations.as_ref()?.get(key).map(String::as_str)
}

fn set_annotation(d: &mut Deployment, key: &str, value: String) {
    d.meta_mut()
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value);
}
