//! Executioner: applies at most one remediation per eligible deployment
//! per tick, subject to an active-time window and per-deployment gates.
//!
//! Grounded in `original_source/pkg/criteria/executioner.go`. Active-time
//! parsing is grounded in `pkg/criteria/executioner_test.go`'s YAML shape
//! (borrowed from `prometheus/alertmanager`'s `MuteTimeInterval`), kept as
//! a plain struct here rather than depending on the `alertmanager` crate.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use kube::Resource;
use tracing::{debug, warn};

use crate::channel;
use crate::config::{Config, NamedTimeIntervals};
use crate::flags::FeatureFlags;
use crate::history::{HistorySink, KilledEvent};
use crate::metrics::Metrics;
use crate::orchestrator::{DeploymentPatch, OrchestratorClient};
use crate::resources::{
    team_of, CHANGE_CAUSE_ANNOTATION, ENABLED_LABEL, REVISION_ANNOTATION, ROLLED_BACK_CAUSE,
    SCALED_DOWN_CAUSE, STRATEGY_ABORT_ROLLOUT, STRATEGY_ANNOTATION, STRATEGY_DOWNSCALE,
};
use crate::{Error, Result};

/// A single weekday+minute-of-day window during which the executioner may act.
#[derive(Debug, Clone)]
pub struct ActiveInterval {
    pub weekdays: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ActiveInterval {
    fn contains(&self, now: DateTime<Utc>) -> bool {
        if !self.weekdays.is_empty() && !self.weekdays.contains(&now.weekday()) {
            return false;
        }
        let t = now.time();
        if self.start <= self.end {
            t >= self.start && t <= self.end
        } else {
            // Interval wraps past midnight.
            t >= self.start || t <= self.end
        }
    }
}

/// Parses the YAML document bound to `--active-time-intervals`. An empty
/// document yields no groups, which [`Executioner::in_active_period`]
/// treats as "always active".
pub fn parse_active_intervals(yaml: &str) -> Result<HashMap<String, Vec<ActiveInterval>>> {
    if yaml.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let groups: Vec<NamedTimeIntervals> = serde_yaml::from_str(yaml)
        .map_err(|e| Error::KubeInvariant(format!("invalid active-time-intervals document: {e}")))?;

    let mut out = HashMap::new();
    for group in groups {
        let mut intervals = Vec::new();
        for spec in &group.time_intervals {
            let weekdays = expand_weekdays(&spec.weekdays)?;
            for range in &spec.times {
                intervals.push(ActiveInterval {
                    weekdays: weekdays.clone(),
                    start: parse_time(&range.start_time)?,
                    end: parse_time(&range.end_time)?,
                });
            }
        }
        out.insert(group.name, intervals);
    }
    Ok(out)
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|e| Error::KubeInvariant(format!("invalid time {s:?}: {e}")))
}

fn weekday_from_name(s: &str) -> Result<Weekday> {
    match s.trim().to_ascii_lowercase().as_str() {
        "monday" => Ok(Weekday::Mon),
        "tuesday" => Ok(Weekday::Tue),
        "wednesday" => Ok(Weekday::Wed),
        "thursday" => Ok(Weekday::Thu),
        "friday" => Ok(Weekday::Fri),
        "saturday" => Ok(Weekday::Sat),
        "sunday" => Ok(Weekday::Sun),
        other => Err(Error::KubeInvariant(format!("unknown weekday {other:?}"))),
    }
}

fn expand_weekdays(entries: &[String]) -> Result<Vec<Weekday>> {
    let mut out = Vec::new();
    for entry in entries {
        if let Some((start, end)) = entry.split_once(':') {
            let start = weekday_from_name(start)?;
            let end = weekday_from_name(end)?;
            let mut day = start;
            loop {
                out.push(day);
                if day == end {
                    break;
                }
                day = day.succ();
            }
        } else {
            out.push(weekday_from_name(entry)?);
        }
    }
    Ok(out)
}

pub struct Executioner {
    active_intervals: HashMap<String, Vec<ActiveInterval>>,
    cluster: String,
    default_slack_channel: String,
    metrics: Arc<Metrics>,
    history: Arc<dyn HistorySink>,
    flags: Arc<dyn FeatureFlags>,
}

impl Executioner {
    pub fn new(
        config: &Config,
        metrics: Arc<Metrics>,
        history: Arc<dyn HistorySink>,
        flags: Arc<dyn FeatureFlags>,
    ) -> Result<Self> {
        Ok(Self {
            active_intervals: config.active_intervals()?,
            cluster: config.cluster.clone(),
            default_slack_channel: config.default_slack_channel.clone(),
            metrics,
            history,
            flags,
        })
    }

    fn in_active_period(&self, now: DateTime<Utc>) -> bool {
        if self.active_intervals.is_empty() {
            return true;
        }
        self.active_intervals.values().flatten().any(|i| i.contains(now))
    }

    /// `Kill(deployments)` from spec.md §4.3. `armed` selects whether
    /// patches actually reach the orchestrator (the caller is expected to
    /// have already wrapped `client` in a [`crate::orchestrator::DryRunClient`]
    /// when unarmed — `armed` here only controls the `dry_run` tag).
    pub async fn kill<C: OrchestratorClient>(
        &self,
        client: &C,
        deployments: Vec<Deployment>,
        armed: bool,
    ) -> Result<()> {
        if !self.in_active_period(Utc::now()) {
            debug!("outside active window, sleeping");
            return Ok(());
        }

        for d in deployments {
            let ns = d.meta().namespace.clone().unwrap_or_default();
            let name = d.meta().name.clone().unwrap_or_default();
            match self.execute_one(client, &d, armed).await {
                Ok(()) => {}
                Err(e @ Error::InvariantViolation(_)) => return Err(e),
                Err(e) => warn!("cleanup failed for {ns}/{name}: {e}"),
            }
        }
        Ok(())
    }

    async fn execute_one<C: OrchestratorClient>(&self, client: &C, d: &Deployment, armed: bool) -> Result<()> {
        let ns = d.meta().namespace.clone().unwrap_or_default();
        let name = d.meta().name.clone().unwrap_or_default();

        if is_disabled(d) {
            debug!("{ns}/{name} disabled via {ENABLED_LABEL}, skipping");
            return Ok(());
        }
        if annotation(d, CHANGE_CAUSE_ANNOTATION) == Some(ROLLED_BACK_CAUSE) {
            debug!("{ns}/{name} already rolled back, terminal");
            return Ok(());
        }

        let strategies = strategies_of(d);
        let team = team_of(d);
        let channel = channel::resolve(client, self.flags.as_ref(), &self.default_slack_channel, d).await;

        let candidate_result = if strategies.iter().any(|s| s == STRATEGY_ABORT_ROLLOUT) {
            Some(self.get_rollback_candidate(client, &ns, d).await)
        } else {
            None
        };

        if let Some(Ok(candidate)) = &candidate_result {
            return self
                .apply_rollback(client, d, candidate, armed, &ns, &name, &team, &channel)
                .await;
        }

        // A broken orchestrator contract is never papered over by falling
        // back to downscale.
        if let Some(Err(Error::InvariantViolation(m))) = &candidate_result {
            return Err(Error::InvariantViolation(m.clone()));
        }

        if strategies.iter().any(|s| s == STRATEGY_DOWNSCALE) {
            return self.apply_downscale(client, d, armed, &ns, &name, &team, &channel).await;
        }

        match candidate_result {
            Some(Err(Error::NoRollbackCandidate)) | None => {
                debug!("{ns}/{name}: no eligible remediation strategy this tick");
                Ok(())
            }
            Some(Err(e)) => Err(e),
            Some(Ok(_)) => unreachable!("rollback branch already returned"),
        }
    }

    async fn get_rollback_candidate<C: OrchestratorClient>(
        &self,
        client: &C,
        ns: &str,
        d: &Deployment,
    ) -> Result<ReplicaSet> {
        let name = d.meta().name.clone().unwrap_or_default();
        let Some(selector) = d.spec.as_ref().map(|s| s.selector.clone()) else {
            return Err(Error::NoRollbackCandidate);
        };
        let replicasets = client.list_replicasets(ns, &selector).await?;
        if replicasets.is_empty() {
            return Err(Error::InvariantViolation(format!(
                "deployment {ns}/{name} owns zero replica sets"
            )));
        }

        let current_revision = annotation(d, REVISION_ANNOTATION);
        replicasets
            .into_iter()
            .filter(|rs| annotation_of(rs, REVISION_ANNOTATION).as_deref() != current_revision)
            .find(|rs| rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0) > 0)
            .ok_or(Error::NoRollbackCandidate)
    }

    async fn apply_rollback<C: OrchestratorClient>(
        &self,
        client: &C,
        d: &Deployment,
        candidate: &ReplicaSet,
        armed: bool,
        ns: &str,
        name: &str,
        team: &str,
        channel: &str,
    ) -> Result<()> {
        let _ = d;
        let template_spec = candidate
            .spec
            .as_ref()
            .and_then(|s| s.template.as_ref())
            .and_then(|t| t.spec.clone());

        let patch = DeploymentPatch {
            annotations: BTreeMap::from([(CHANGE_CAUSE_ANNOTATION.to_string(), ROLLED_BACK_CAUSE.to_string())]),
            replicas: None,
            template_spec,
        };
        client.patch_deployment(ns, name, &patch).await?;
        self.record(armed, ns, name, team, channel, "rollback");
        Ok(())
    }

    async fn apply_downscale<C: OrchestratorClient>(
        &self,
        client: &C,
        d: &Deployment,
        armed: bool,
        ns: &str,
        name: &str,
        team: &str,
        channel: &str,
    ) -> Result<()> {
        let _ = d;
        let patch = DeploymentPatch {
            annotations: BTreeMap::from([(CHANGE_CAUSE_ANNOTATION.to_string(), SCALED_DOWN_CAUSE.to_string())]),
            replicas: Some(0),
            template_spec: None,
        };
        client.patch_deployment(ns, name, &patch).await?;
        self.record(armed, ns, name, team, channel, "downscale");
        Ok(())
    }

    fn record(&self, armed: bool, ns: &str, name: &str, team: &str, channel: &str, method: &str) {
        let dry_run = !armed;
        self.metrics
            .cleanup_total
            .with_label_values(&[name, ns, team, &dry_run.to_string(), method, channel])
            .inc();
        self.metrics
            .deployment_status
            .with_label_values(&[name, ns, team])
            .set(crate::metrics::STATUS_CLEANUP);
        self.history.record_killed(KilledEvent {
            name: name.to_string(),
            namespace: ns.to_string(),
            method: method.to_string(),
            team: team.to_string(),
            slack_channel: channel.to_string(),
            dry_run,
            cluster: self.cluster.clone(),
        });
    }
}

fn is_disabled(d: &Deployment) -> bool {
    d.meta()
        .labels
        .as_ref()
        .and_then(|l| l.get(ENABLED_LABEL))
        .map(|v| v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

fn strategies_of(d: &Deployment) -> Vec<String> {
    annotation(d, STRATEGY_ANNOTATION)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn annotation<'a>(d: &'a Deployment, key: &str) -> Option<&'a str> {
    d.meta().annotations.as_ref()?.get(key).map(String::as_str)
}

fn annotation_of<R: Resource>(r: &R, key: &str) -> Option<String> {
    r.meta().annotations.as_ref()?.get(key).cloned()
}
