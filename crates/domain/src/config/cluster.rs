use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cluster Guard & service topology
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the Cluster Guard and the Tool Catalog need to know about
/// which clusters exist and how their services relate to one another.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterConfig {
    /// The only kubeconfig contexts this process is permitted to touch.
    /// A request naming a cluster outside this list is always rejected,
    /// before any tool is even looked up.
    #[serde(default)]
    pub allow_list: Vec<String>,
    /// Subset of `allow_list` the orchestrator may auto-remediate against.
    /// A production cluster absent from this list never receives automatic
    /// remediation, regardless of the approved-kind/replica/namespace gates
    /// (§4.6's "prod remediation never auto-approved" rule).
    #[serde(default)]
    pub dev_clusters: Vec<String>,
    /// Namespaces excluded from destructive operations regardless of the
    /// safety hook chain's other rules (e.g. `"kube-system"`, `"kube-public"`).
    #[serde(default = "d_protected_namespaces")]
    pub protected_namespaces: Vec<String>,
    /// Maps a logical service name to the namespace/deployment it lives in,
    /// so findings and tickets can be filed against a human-meaningful name
    /// instead of a raw selector.
    #[serde(default)]
    pub service_map: HashMap<String, ServiceMapping>,
    /// Optional map of NAT gateway identifiers to the service names that
    /// egress through them, for the optional traffic-correlation read tool.
    #[serde(default)]
    pub nat_gateway_map: HashMap<String, Vec<String>>,
    /// Alerting thresholds consulted by the Monitoring Orchestrator's
    /// severity classification step.
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Escalation routing: severity -> where the notifier sends it.
    #[serde(default)]
    pub escalation: HashMap<String, EscalationTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMapping {
    pub cluster: String,
    pub namespace: String,
    pub deployment: String,
    /// Owning team, surfaced in tickets and notifications.
    #[serde(default)]
    pub owner: Option<String>,
    /// Criticality tier consulted by the escalation table (§4.6).
    #[serde(default)]
    pub criticality: ServiceTier,
    /// GitHub owner/repo this service's deployments are correlated against.
    #[serde(default)]
    pub repo_owner: Option<String>,
    #[serde(default)]
    pub repo_name: Option<String>,
    /// Known, already-triaged issues surfaced alongside a new finding so a
    /// subagent doesn't re-diagnose something already understood.
    #[serde(default)]
    pub known_issues: Vec<String>,
    /// Other service names this one depends on, for blast-radius context.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Service criticality tier, consulted by the escalation table (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceTier {
    P0,
    P1,
    P2,
    P3,
}

impl Default for ServiceTier {
    fn default() -> Self {
        ServiceTier::P2
    }
}

impl std::fmt::Display for ServiceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceTier::P0 => "P0",
            ServiceTier::P1 => "P1",
            ServiceTier::P2 => "P2",
            ServiceTier::P3 => "P3",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "d_cpu_pct")]
    pub cpu_saturation_pct: f64,
    #[serde(default = "d_mem_pct")]
    pub memory_saturation_pct: f64,
    #[serde(default = "d_error_rate_pct")]
    pub error_rate_pct: f64,
    #[serde(default = "d_restart_count")]
    pub crashloop_restart_count: u32,
    #[serde(default = "d_p99_ms")]
    pub latency_p99_ms: u64,
    /// Minutes a workload may stay unhealthy before the escalation table's
    /// "Recovery > max_downtime" column applies (§4.6).
    #[serde(default = "d_max_downtime_minutes")]
    pub max_downtime_minutes: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_saturation_pct: d_cpu_pct(),
            memory_saturation_pct: d_mem_pct(),
            error_rate_pct: d_error_rate_pct(),
            crashloop_restart_count: d_restart_count(),
            latency_p99_ms: d_p99_ms(),
            max_downtime_minutes: d_max_downtime_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationTarget {
    /// `"teams"`, `"jira"`, or `"both"`.
    pub notify_via: String,
    #[serde(default)]
    pub require_ticket: bool,
}

fn d_protected_namespaces() -> Vec<String> {
    vec!["kube-system".into(), "kube-public".into(), "kube-node-lease".into()]
}
fn d_cpu_pct() -> f64 {
    90.0
}
fn d_mem_pct() -> f64 {
    90.0
}
fn d_error_rate_pct() -> f64 {
    5.0
}
fn d_restart_count() -> u32 {
    3
}
fn d_p99_ms() -> u64 {
    2_000
}
fn d_max_downtime_minutes() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_protected_namespaces_include_kube_system() {
        let cfg = ClusterConfig::default();
        assert!(cfg.protected_namespaces.contains(&"kube-system".to_string()));
    }

    #[test]
    fn thresholds_defaults_are_reasonable() {
        let t = Thresholds::default();
        assert!(t.cpu_saturation_pct > 0.0 && t.cpu_saturation_pct <= 100.0);
        assert!(t.crashloop_restart_count > 0);
    }
}
