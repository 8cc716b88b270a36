//! Prometheus counters and gauges under the `babylon_` prefix.
//!
//! Grounded in the upstream project's `pkg/metrics/metrics.go`
//! (`promauto`-registered counters/gauges), rebuilt against the real
//! `prometheus` crate using the registry-construction style seen in the
//! pack's kube-controller examples (explicit `Registry`, `*Vec` metrics
//! registered once at construction time rather than lazily).
use prometheus::{CounterVec, GaugeVec, Opts, Registry, TextEncoder};

pub const STATUS_OK: f64 = 0.0;
pub const STATUS_FAILING: f64 = 1.0;
pub const STATUS_CLEANUP: f64 = 2.0;

/// Process-wide metrics registry. Cheap to `Clone` (every field is an
/// `Arc`-backed prometheus handle); share one instance across the tick
/// loop and the HTTP `/metrics` handler.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub rule_activations: CounterVec,
    pub cleanup_total: CounterVec,
    pub team_notifications: CounterVec,
    pub deployment_status: GaugeVec,
    pub last_updated: GaugeVec,
    pub grace_cutoff: GaugeVec,
    pub slack_channel_info: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let rule_activations = CounterVec::new(
            Opts::new("babylon_rule_activations_total", "Rules triggered"),
            &["deployment", "namespace", "affected_team", "reason"],
        )
        .expect("metric definition is valid");

        let cleanup_total = CounterVec::new(
            Opts::new("babylon_cleanup_total", "Cleanup actions applied"),
            &["deployment", "namespace", "affected_team", "dry_run", "reason", "slack_channel"],
        )
        .expect("metric definition is valid");

        let team_notifications = CounterVec::new(
            Opts::new("babylon_team_notifications_total", "Streak-start notifications"),
            &["deployment", "namespace", "affected_team", "slack_channel", "grace_cutoff"],
        )
        .expect("metric definition is valid");

        let deployment_status = GaugeVec::new(
            Opts::new(
                "babylon_deployment_status",
                "Deployment status: 0=OK, 1=FAILING, 2=CLEANUP",
            ),
            &["deployment", "namespace", "affected_team"],
        )
        .expect("metric definition is valid");

        let last_updated = GaugeVec::new(
            Opts::new("babylon_last_updated_timestamp", "Unix timestamp of last status update"),
            &["deployment", "namespace"],
        )
        .expect("metric definition is valid");

        let grace_cutoff = GaugeVec::new(
            Opts::new(
                "babylon_grace_cutoff_timestamp",
                "Unix timestamp at which grace period elapses, zero when OK",
            ),
            &["deployment", "namespace"],
        )
        .expect("metric definition is valid");

        let slack_channel_info = GaugeVec::new(
            Opts::new(
                "babylon_slack_channel_info",
                "Latest resolved slack channel for a deployment/team, always 1",
            ),
            &["deployment", "affected_team", "slack_channel"],
        )
        .expect("metric definition is valid");

        for c in [&rule_activations, &cleanup_total, &team_notifications] {
            registry
                .register(Box::new(c.clone()))
                .expect("metric not yet registered");
        }
        for g in [&deployment_status, &last_updated, &grace_cutoff, &slack_channel_info] {
            registry
                .register(Box::new(g.clone()))
                .expect("metric not yet registered");
        }

        Self {
            registry,
            rule_activations,
            cleanup_total,
            team_notifications,
            deployment_status,
            last_updated,
            grace_cutoff,
            slack_channel_info,
        }
    }

    /// Render every registered metric in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let families = self.registry.gather();
        TextEncoder::new()
            .encode_to_string(&families)
            .unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_activation_counters_increment() {
        let m = Metrics::new();
        m.rule_activations
            .with_label_values(&["d1", "ns", "teamA", "ImagePullBackOff"])
            .inc();
        assert_eq!(
            m.rule_activations
                .with_label_values(&["d1", "ns", "teamA", "ImagePullBackOff"])
                .get(),
            1.0
        );
    }

    #[test]
    fn status_gauge_reflects_latest_set() {
        let m = Metrics::new();
        m.deployment_status.with_label_values(&["d1", "ns", "teamA"]).set(STATUS_FAILING);
        assert_eq!(
            m.deployment_status.with_label_values(&["d1", "ns", "teamA"]).get(),
            STATUS_FAILING
        );
    }

    #[test]
    fn encode_includes_metric_names() {
        let m = Metrics::new();
        m.cleanup_total
            .with_label_values(&["d1", "ns", "teamA", "false", "rollback", "#team"])
            .inc();
        let text = m.encode();
        assert!(text.contains("babylon_cleanup_total"));
    }
}
