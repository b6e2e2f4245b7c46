//! The Finding — a detected non-healthy workload state, plus the severity
//! and ticket-tracker vocabulary used to reason about it. Pure data; the
//! escalation table and auto-remediation gate that consume these types are
//! business logic and live in `ki_gateway::runtime::findings`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity assigned to a [`Finding`] by the escalation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// The kind of non-healthy workload state a diagnostics subagent reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    CrashLoopBackOff,
    OomKilled,
    ImagePullBackOff,
    Pending,
    NotReady,
    Other(String),
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FindingKind::CrashLoopBackOff => "CrashLoopBackOff",
            FindingKind::OomKilled => "OOMKilled",
            FindingKind::ImagePullBackOff => "ImagePullBackOff",
            FindingKind::Pending => "Pending",
            FindingKind::NotReady => "NotReady",
            FindingKind::Other(s) => s,
        };
        f.write_str(s)
    }
}

impl FindingKind {
    /// Whether this kind requires log evidence before escalation (§4.6 step 4).
    pub fn requires_log_evidence(&self) -> bool {
        matches!(self, FindingKind::CrashLoopBackOff | FindingKind::OomKilled)
    }
}

/// A merged-PR reference attached to a finding when its merge window
/// overlaps `first_seen ± 30 min` (§4.6 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedDeployment {
    pub repo: String,
    pub pr_number: u64,
    pub title: String,
    pub merged_at: DateTime<Utc>,
}

/// Optional NAT/Datadog egress correlation (§4.6 step 4, §9 open question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedTraffic {
    pub nat_gateway: String,
    pub summary: String,
}

/// A detected non-healthy state of a workload, with severity and evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub cluster: String,
    pub namespace: String,
    pub workload: String,
    pub kind: FindingKind,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub restart_count: Option<u32>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub replicas_ready: Option<u32>,
    #[serde(default)]
    pub correlated_deployments: Vec<CorrelatedDeployment>,
    #[serde(default)]
    pub correlated_traffic: Option<CorrelatedTraffic>,
}

impl Finding {
    /// The `[cluster] component: kind` summary format §4.7 fixes tickets to.
    pub fn ticket_summary(&self) -> String {
        format!("[{}] {}: {}", self.cluster, self.workload, self.kind)
    }

    /// Stable fingerprint used to deduplicate findings across cycles,
    /// independent of the ticket tracker's own key.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.cluster, self.namespace, self.workload, self.kind
        )
    }
}

/// Where a ticket lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tracker {
    Jira,
    Github,
}

/// Ticket priority, mapped 1:1 from [`Severity`] (§4.7 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Highest,
    High,
    Medium,
    Low,
}

impl From<Severity> for Priority {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Critical => Priority::Highest,
            Severity::High => Priority::High,
            Severity::Medium => Priority::Medium,
            Severity::Low => Priority::Low,
        }
    }
}

impl std::fmt::Display for Priority {
    /// Jira's stock priority scheme names (`fields.priority.name`).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Highest => "Highest",
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        };
        f.write_str(s)
    }
}

/// A transient reference to a ticket in the external tracker. This system
/// never owns ticket state — it only carries this reference during a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketReference {
    pub tracker: Tracker,
    pub key: String,
    pub url: String,
    pub state: String,
    pub last_comment_at: Option<DateTime<Utc>>,
    /// Metrics snapshot parsed back out of the last comment body, so the
    /// next cycle's significance gate (§4.7 gate B) has something to diff
    /// against.
    pub last_known_metrics: Option<TicketMetricsSnapshot>,
}

/// The metrics snapshot persisted in a ticket comment body so the next
/// cycle can parse "last known metrics" back out of plain text.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TicketMetricsSnapshot {
    pub restart_count: u32,
    pub severity_rank: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_summary_format_matches_spec() {
        let f = Finding {
            severity: Severity::High,
            cluster: "dev-eks".into(),
            namespace: "app-dev".into(),
            workload: "api".into(),
            kind: FindingKind::CrashLoopBackOff,
            evidence: vec![],
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            restart_count: Some(7),
            replicas: Some(3),
            replicas_ready: Some(2),
            correlated_deployments: vec![],
            correlated_traffic: None,
        };
        assert_eq!(f.ticket_summary(), "[dev-eks] api: CrashLoopBackOff");
    }

    #[test]
    fn severity_ord_is_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn priority_maps_one_to_one_from_severity() {
        assert!(matches!(Priority::from(Severity::Critical), Priority::Highest));
        assert!(matches!(Priority::from(Severity::Low), Priority::Low));
    }

    #[test]
    fn crashloop_requires_log_evidence() {
        assert!(FindingKind::CrashLoopBackOff.requires_log_evidence());
        assert!(!FindingKind::Pending.requires_log_evidence());
    }
}
