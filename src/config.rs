//! Process configuration: CLI flags bound to environment variables, with
//! the same defaults and option names as the process this crate supersedes.
use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::executioner::ActiveInterval;

pub const DEFAULT_TICK_RATE: Duration = Duration::from_secs(15 * 60);

fn parse_duration_arg(s: &str) -> std::result::Result<Duration, String> {
    parse_duration::parse(s).map_err(|e| format!("invalid duration {s:?}: {e}"))
}

fn parse_csv(s: &str) -> std::result::Result<Vec<String>, std::convert::Infallible> {
    Ok(s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Process-wide settings, bound from CLI flags or environment variables
/// of the same name (upper-cased, per `clap`'s `env` convention).
#[derive(Parser, Debug, Clone)]
#[command(name = "babylon", about = "cluster-level deployment janitor")]
pub struct Config {
    /// If unset, patches are routed through a dry-run-only wrapper.
    #[arg(long, env = "ARMED", default_value_t = false)]
    pub armed: bool,

    /// Gap between reconciliation ticks.
    #[arg(long, env = "TICK_RATE", value_parser = parse_duration_arg, default_value = "15m")]
    pub tick_rate: Duration,

    /// Minimum deployment age to be judgeable.
    #[arg(long, env = "RESOURCE_AGE", value_parser = parse_duration_arg, default_value = "10m")]
    pub resource_age: Duration,

    /// Restart count above which `CrashLoopBackOff` counts as failing.
    #[arg(long, env = "RESTART_THRESHOLD", default_value_t = 500)]
    pub restart_threshold: i32,

    /// Default grace period, overridden per-deployment via an annotation.
    #[arg(long, env = "GRACE_PERIOD", value_parser = parse_duration_arg, default_value = "24h")]
    pub grace_period: Duration,

    /// Extra wait appended to the grace period before remediation.
    #[arg(long, env = "NOTIFICATION_DELAY", value_parser = parse_duration_arg, default_value = "1h")]
    pub notification_delay: Duration,

    /// When true, only namespaces contain-matching `allowed_namespaces` are eligible.
    /// When false, every namespace is eligible.
    #[arg(long, env = "USE_ALLOWED_NAMESPACES", default_value_t = false)]
    pub use_allowed_namespaces: bool,

    #[arg(long, env = "ALLOWED_NAMESPACES", value_parser = parse_csv, default_value = "")]
    pub allowed_namespaces: Vec<String>,

    /// YAML document describing named active-time-interval groups; see
    /// [`crate::executioner::parse_active_intervals`]. Empty means "always active".
    #[arg(long, env = "ACTIVE_TIME_INTERVALS", default_value = "")]
    pub active_time_intervals: String,

    /// Tag attached to every emitted history row.
    #[arg(long, env = "CLUSTER", default_value = "unknown")]
    pub cluster: String,

    /// Slack channel used when no namespace/Alert channel can be resolved.
    #[arg(long, env = "DEFAULT_SLACK_CHANNEL", default_value = "#babylon-alerts")]
    pub default_slack_channel: String,

    /// Enables the namespace-annotation and Alert-CR channel lookups.
    #[arg(long, env = "BABYLON_ALERTS", default_value_t = false)]
    pub babylon_alerts: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: String,
}

impl Config {
    pub fn active_intervals(&self) -> crate::Result<HashMap<String, Vec<ActiveInterval>>> {
        crate::executioner::parse_active_intervals(&self.active_time_intervals)
    }

    /// Namespace policy from spec.md §4.2, filter 1. Returns true iff
    /// `namespace` is eligible to act on under the configured scheme.
    pub fn is_namespace_allowed(&self, namespace: &str) -> bool {
        if self.use_allowed_namespaces {
            contains_match(namespace, &self.allowed_namespaces)
        } else {
            true
        }
    }
}

/// Contain-match: true if any non-empty entry is a substring of
/// `namespace`, or `namespace` is a substring of the entry.
fn contains_match(namespace: &str, entries: &[String]) -> bool {
    entries
        .iter()
        .filter(|e| !e.is_empty())
        .any(|e| namespace.contains(e.as_str()) || e.contains(namespace))
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NamedTimeIntervals {
    pub name: String,
    #[serde(default)]
    pub time_intervals: Vec<TimeIntervalSpec>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TimeIntervalSpec {
    #[serde(default)]
    pub weekdays: Vec<String>,
    #[serde(default)]
    pub times: Vec<TimeRange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeRange {
    pub start_time: String,
    pub end_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_scheme_empty_list_denies_everything() {
        let mut cfg = default_test_config();
        cfg.use_allowed_namespaces = true;
        cfg.allowed_namespaces = vec![];
        assert!(!cfg.is_namespace_allowed("test"));
    }

    #[test]
    fn allow_scheme_contains_either_direction() {
        let mut cfg = default_test_config();
        cfg.use_allowed_namespaces = true;
        cfg.allowed_namespaces = vec!["oddrane".to_string()];
        assert!(cfg.is_namespace_allowed("odd"));
    }

    #[test]
    fn allow_scheme_sanity_check() {
        let mut cfg = default_test_config();
        cfg.use_allowed_namespaces = true;
        cfg.allowed_namespaces = vec!["babylon-test".to_string(), "kuttl-test".to_string()];
        assert!(cfg.is_namespace_allowed("kuttl-test-able-molly"));
    }

    #[test]
    fn disabled_scheme_allows_everything() {
        let cfg = default_test_config();
        assert!(cfg.is_namespace_allowed("anything"));
    }

    fn default_test_config() -> Config {
        Config {
            armed: false,
            tick_rate: DEFAULT_TICK_RATE,
            resource_age: Duration::from_secs(600),
            restart_threshold: 500,
            grace_period: Duration::from_secs(3600 * 24),
            notification_delay: Duration::from_secs(0),
            use_allowed_namespaces: false,
            allowed_namespaces: vec![],
            active_time_intervals: String::new(),
            cluster: "test".to_string(),
            default_slack_channel: "#test".to_string(),
            babylon_alerts: false,
            log_level: "info".to_string(),
            port: "8080".to_string(),
        }
    }
}
