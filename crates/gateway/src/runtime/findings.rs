//! Finding parsing, the escalation table, and the approved-auto-remediation
//! gate (§4.6). All pure functions over [`Finding`] + config — no I/O, unit
//! tested directly, in the style of the teacher's cooldown/throttle helpers.

use serde::Deserialize;

use ki_domain::config::cluster::ServiceTier;
use ki_domain::finding::{Finding, FindingKind, Severity};

/// The health condition driving the escalation table's column choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowntimeCondition {
    AnyPodDown,
    AllPodsDown,
    RecoveryExceeded,
}

/// The §4.6 escalation table: service tier x downtime condition -> severity.
pub fn escalation_severity(tier: ServiceTier, condition: DowntimeCondition) -> Severity {
    use DowntimeCondition::*;
    use ServiceTier::*;
    match (tier, condition) {
        (P0, AnyPodDown) => Severity::High,
        (P0, AllPodsDown) | (P0, RecoveryExceeded) => Severity::Critical,
        (P1, AnyPodDown) => Severity::Medium,
        (P1, AllPodsDown) | (P1, RecoveryExceeded) => Severity::High,
        (P2, AnyPodDown) | (P3, AnyPodDown) => Severity::Low,
        (P2, AllPodsDown) | (P3, AllPodsDown) | (P2, RecoveryExceeded) | (P3, RecoveryExceeded) => {
            Severity::Medium
        }
    }
}

/// Derive the downtime condition from a finding's replica counts and how
/// long it has been unhealthy, against the configured max downtime.
pub fn downtime_condition(finding: &Finding, max_downtime_minutes: u64) -> DowntimeCondition {
    let unhealthy_minutes = finding
        .last_seen
        .signed_duration_since(finding.first_seen)
        .num_minutes()
        .max(0) as u64;
    if unhealthy_minutes > max_downtime_minutes {
        return DowntimeCondition::RecoveryExceeded;
    }
    match (finding.replicas, finding.replicas_ready) {
        (Some(total), Some(ready)) if total > 0 && ready == 0 => DowntimeCondition::AllPodsDown,
        (Some(total), Some(ready)) if ready < total => DowntimeCondition::AnyPodDown,
        _ => DowntimeCondition::AnyPodDown,
    }
}

/// Everything the approved-auto-remediation gate (§4.6) needs to decide,
/// gathered so the decision itself stays a pure function over plain data.
pub struct RemediationContext<'a> {
    pub finding: &'a Finding,
    pub protected_namespaces: &'a [String],
    pub dev_clusters: &'a [String],
    pub approved_auto_remediation: &'a [String],
    /// Idempotence guard: the same remediation tool name applied to this
    /// finding's fingerprint in the previous cycle.
    pub already_applied_last_cycle: bool,
}

/// The tool the orchestrator would invoke for a given finding kind, if any.
fn remediation_tool_for(finding: &Finding) -> Option<&'static str> {
    match &finding.kind {
        FindingKind::CrashLoopBackOff if !finding.correlated_deployments.is_empty() => {
            Some("rollout_restart")
        }
        FindingKind::Pending => Some("delete_pod"),
        _ => None,
    }
}

/// Evaluate the §4.6 approved-auto-remediation gate. `Ok(tool_name)` means
/// every condition holds and the orchestrator may invoke that tool; `Err`
/// carries the reason the gate refused, for the cycle report.
pub fn approved_for_auto_remediation(ctx: &RemediationContext) -> Result<&'static str, String> {
    let tool = remediation_tool_for(ctx.finding).ok_or_else(|| {
        format!(
            "finding kind {} is not eligible for automatic remediation",
            ctx.finding.kind
        )
    })?;

    if matches!(ctx.finding.kind, FindingKind::Pending) {
        let unhealthy_minutes = ctx
            .finding
            .last_seen
            .signed_duration_since(ctx.finding.first_seen)
            .num_minutes();
        if unhealthy_minutes < 10 {
            return Err("Pending finding has not been transient long enough (< 10 min)".into());
        }
    }

    if ctx.finding.replicas.unwrap_or(0) < 2 {
        return Err("target deployment has fewer than 2 replicas".into());
    }

    if ctx
        .protected_namespaces
        .iter()
        .any(|ns| ns == &ctx.finding.namespace)
    {
        return Err(format!("namespace {} is protected", ctx.finding.namespace));
    }

    if !ctx.dev_clusters.iter().any(|c| c == &ctx.finding.cluster) {
        return Err(format!(
            "cluster {} is not on the dev auto-remediation allow-list",
            ctx.finding.cluster
        ));
    }

    if !ctx
        .approved_auto_remediation
        .iter()
        .any(|k| k == tool)
    {
        return Err(format!("tool {tool} is not in approved_auto_remediation"));
    }

    if ctx.already_applied_last_cycle {
        return Err("this remediation was already applied last cycle".into());
    }

    Ok(tool)
}

/// The shape a diagnostics subagent is instructed to return — one entry per
/// non-healthy workload, parsed into [`Finding`]s by [`parse_findings`].
#[derive(Debug, Deserialize)]
struct RawFinding {
    cluster: String,
    namespace: String,
    workload: String,
    kind: String,
    #[serde(default)]
    evidence: Vec<String>,
    first_seen: chrono::DateTime<chrono::Utc>,
    last_seen: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    restart_count: Option<u32>,
    #[serde(default)]
    replicas: Option<u32>,
    #[serde(default)]
    replicas_ready: Option<u32>,
}

fn parse_kind(s: &str) -> FindingKind {
    match s {
        "CrashLoopBackOff" => FindingKind::CrashLoopBackOff,
        "OOMKilled" => FindingKind::OomKilled,
        "ImagePullBackOff" => FindingKind::ImagePullBackOff,
        "Pending" => FindingKind::Pending,
        "NotReady" => FindingKind::NotReady,
        other => FindingKind::Other(other.to_string()),
    }
}

/// Parse a diagnostics subagent's JSON report (`{"findings": [...]}`) into
/// [`Finding`]s with a provisional [`Severity::Low`] — the orchestrator
/// assigns the real severity via [`escalation_severity`] once it knows each
/// workload's service tier.
pub fn parse_findings(raw_json: &str) -> Result<Vec<Finding>, String> {
    #[derive(Deserialize)]
    struct Envelope {
        findings: Vec<RawFinding>,
    }

    let envelope: Envelope =
        serde_json::from_str(raw_json).map_err(|e| format!("invalid diagnostics report: {e}"))?;

    Ok(envelope
        .findings
        .into_iter()
        .map(|r| Finding {
            severity: Severity::Low,
            cluster: r.cluster,
            namespace: r.namespace,
            workload: r.workload,
            kind: parse_kind(&r.kind),
            evidence: r.evidence,
            first_seen: r.first_seen,
            last_seen: r.last_seen,
            restart_count: r.restart_count,
            replicas: r.replicas,
            replicas_ready: r.replicas_ready,
            correlated_deployments: Vec::new(),
            correlated_traffic: None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn finding(kind: FindingKind, replicas: Option<u32>, ready: Option<u32>) -> Finding {
        Finding {
            severity: Severity::Low,
            cluster: "dev-eks".into(),
            namespace: "app-dev".into(),
            workload: "api".into(),
            kind,
            evidence: vec![],
            first_seen: Utc::now() - Duration::minutes(10),
            last_seen: Utc::now(),
            restart_count: Some(7),
            replicas,
            replicas_ready: ready,
            correlated_deployments: vec![],
            correlated_traffic: None,
        }
    }

    #[test]
    fn escalation_table_matches_spec() {
        assert_eq!(
            escalation_severity(ServiceTier::P0, DowntimeCondition::AnyPodDown),
            Severity::High
        );
        assert_eq!(
            escalation_severity(ServiceTier::P0, DowntimeCondition::AllPodsDown),
            Severity::Critical
        );
        assert_eq!(
            escalation_severity(ServiceTier::P1, DowntimeCondition::AnyPodDown),
            Severity::Medium
        );
        assert_eq!(
            escalation_severity(ServiceTier::P2, DowntimeCondition::AllPodsDown),
            Severity::Medium
        );
        assert_eq!(
            escalation_severity(ServiceTier::P3, DowntimeCondition::AnyPodDown),
            Severity::Low
        );
    }

    #[test]
    fn downtime_condition_all_pods_down() {
        let f = finding(FindingKind::CrashLoopBackOff, Some(3), Some(0));
        assert_eq!(downtime_condition(&f, 30), DowntimeCondition::AllPodsDown);
    }

    #[test]
    fn downtime_condition_recovery_exceeded_overrides_replica_state() {
        let mut f = finding(FindingKind::CrashLoopBackOff, Some(3), Some(2));
        f.first_seen = Utc::now() - Duration::minutes(45);
        assert_eq!(downtime_condition(&f, 30), DowntimeCondition::RecoveryExceeded);
    }

    #[test]
    fn auto_remediation_denied_without_replica_headroom() {
        let mut f = finding(FindingKind::CrashLoopBackOff, Some(1), Some(0));
        f.correlated_deployments.push(ki_domain::finding::CorrelatedDeployment {
            repo: "org/api".into(),
            pr_number: 452,
            title: "lower memory limit".into(),
            merged_at: Utc::now(),
        });
        let ctx = RemediationContext {
            finding: &f,
            protected_namespaces: &[],
            dev_clusters: &["dev-eks".into()],
            approved_auto_remediation: &["rollout_restart".into()],
            already_applied_last_cycle: false,
        };
        assert!(approved_for_auto_remediation(&ctx).is_err());
    }

    #[test]
    fn auto_remediation_approved_for_crashloop_with_deploy_correlation() {
        let mut f = finding(FindingKind::CrashLoopBackOff, Some(3), Some(2));
        f.correlated_deployments.push(ki_domain::finding::CorrelatedDeployment {
            repo: "org/api".into(),
            pr_number: 452,
            title: "lower memory limit".into(),
            merged_at: Utc::now(),
        });
        let ctx = RemediationContext {
            finding: &f,
            protected_namespaces: &[],
            dev_clusters: &["dev-eks".into()],
            approved_auto_remediation: &["rollout_restart".into()],
            already_applied_last_cycle: false,
        };
        assert_eq!(approved_for_auto_remediation(&ctx), Ok("rollout_restart"));
    }

    #[test]
    fn auto_remediation_denied_on_prod_cluster() {
        let mut f = finding(FindingKind::CrashLoopBackOff, Some(3), Some(2));
        f.cluster = "prod-eks".into();
        f.correlated_deployments.push(ki_domain::finding::CorrelatedDeployment {
            repo: "org/api".into(),
            pr_number: 452,
            title: "lower memory limit".into(),
            merged_at: Utc::now(),
        });
        let ctx = RemediationContext {
            finding: &f,
            protected_namespaces: &[],
            dev_clusters: &["dev-eks".into()],
            approved_auto_remediation: &["rollout_restart".into()],
            already_applied_last_cycle: false,
        };
        assert!(approved_for_auto_remediation(&ctx).is_err());
    }

    #[test]
    fn auto_remediation_denied_when_already_applied() {
        let mut f = finding(FindingKind::CrashLoopBackOff, Some(3), Some(2));
        f.correlated_deployments.push(ki_domain::finding::CorrelatedDeployment {
            repo: "org/api".into(),
            pr_number: 452,
            title: "lower memory limit".into(),
            merged_at: Utc::now(),
        });
        let ctx = RemediationContext {
            finding: &f,
            protected_namespaces: &[],
            dev_clusters: &["dev-eks".into()],
            approved_auto_remediation: &["rollout_restart".into()],
            already_applied_last_cycle: true,
        };
        assert!(approved_for_auto_remediation(&ctx).is_err());
    }

    #[test]
    fn parse_findings_from_diagnostics_json() {
        let json = serde_json::json!({
            "findings": [{
                "cluster": "dev-eks",
                "namespace": "app-dev",
                "workload": "api",
                "kind": "CrashLoopBackOff",
                "evidence": ["7 restarts in 10m"],
                "first_seen": Utc::now().to_rfc3339(),
                "last_seen": Utc::now().to_rfc3339(),
                "restart_count": 7,
                "replicas": 3,
                "replicas_ready": 2
            }]
        })
        .to_string();

        let findings = parse_findings(&json).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::CrashLoopBackOff);
        assert_eq!(findings[0].restart_count, Some(7));
    }

    #[test]
    fn parse_findings_rejects_invalid_json() {
        assert!(parse_findings("not json").is_err());
    }
}
