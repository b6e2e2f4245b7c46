//! Ticket Correlator — "quality over quantity" ticket behavior (§4.7).
//!
//! The create-vs-comment decision is a pure function over a ticket's prior
//! state and the newly observed one; only the search/create/comment calls
//! themselves are I/O, dispatched as ordinary tool calls through the
//! catalog so they go through the same safety chain and audit trail as
//! everything else (mirroring `lifecycle.rs::should_reset` (pure) /
//! `store.rs::reset_session` (I/O shell) in the session store).

use ki_domain::finding::{Finding, Priority, TicketMetricsSnapshot, TicketReference};

/// Everything the gate functions need to know about the prior and current
/// observation of one finding.
#[derive(Debug, Clone)]
pub struct GateInputs {
    pub hours_since_last_comment: Option<f64>,
    pub status_changed: bool,
    pub delta_restart_count: i64,
    pub new_error_pattern: bool,
    pub severity_changed: bool,
    pub remediation_attempted: bool,
    pub newly_resolved: bool,
    pub first_detection: bool,
}

/// Gate A — time/status (§4.7): hours since last comment ≥ 24, OR the
/// observed status changed.
pub fn gate_a(inputs: &GateInputs) -> bool {
    inputs.hours_since_last_comment.map(|h| h >= 24.0).unwrap_or(false) || inputs.status_changed
}

/// Gate B — significance (§4.7): any of restart-count delta, new error
/// pattern, severity change, remediation attempt, resolution, or first
/// detection.
pub fn gate_b(inputs: &GateInputs) -> bool {
    inputs.delta_restart_count >= 10
        || inputs.new_error_pattern
        || inputs.severity_changed
        || inputs.remediation_attempted
        || inputs.newly_resolved
        || inputs.first_detection
}

/// Both gates must hold for a comment to be added to an existing ticket.
pub fn should_comment(inputs: &GateInputs) -> bool {
    gate_a(inputs) && gate_b(inputs)
}

/// Build the JQL used to search for an existing open ticket for this
/// finding's `[cluster] workload: kind` summary (§4.7 step 1).
pub fn search_query(project_key: &str, finding: &Finding) -> String {
    format!(
        "project = {} AND statusCategory != Done AND summary ~ \"\\\"{}\\\"\"",
        project_key,
        finding.ticket_summary()
    )
}

/// Structured markdown comment body for an existing ticket (§4.7). The
/// metrics snapshot is embedded so the next cycle can parse "last known
/// metrics" back out of plain text.
pub fn format_comment(finding: &Finding, inputs: &GateInputs, snapshot: TicketMetricsSnapshot) -> String {
    let mut sections = String::new();

    sections.push_str("## Change Detected\n");
    if inputs.status_changed {
        sections.push_str("- Observed status changed.\n");
    }
    if inputs.severity_changed {
        sections.push_str(&format!("- Severity is now {}.\n", finding.severity));
    }
    if inputs.remediation_attempted {
        sections.push_str("- A remediation action was attempted this cycle.\n");
    }
    if inputs.newly_resolved {
        sections.push_str("- The workload has been healthy for at least 30 minutes.\n");
    }
    if inputs.first_detection {
        sections.push_str("- First detection of this finding.\n");
    }

    sections.push_str("\n## Current Metrics\n");
    sections.push_str(&format!(
        "- restart_count={}\n- severity_rank={}\n",
        snapshot.restart_count, snapshot.severity_rank
    ));

    sections.push_str("\n## New Observations\n");
    if finding.evidence.is_empty() {
        sections.push_str("- (none reported)\n");
    } else {
        for line in &finding.evidence {
            sections.push_str(&format!("- {line}\n"));
        }
    }

    if !finding.correlated_deployments.is_empty() {
        sections.push_str("\n## Deployment Correlation\n");
        for dep in &finding.correlated_deployments {
            sections.push_str(&format!(
                "- {} PR #{} \"{}\" merged {}\n",
                dep.repo,
                dep.pr_number,
                dep.title,
                dep.merged_at.to_rfc3339()
            ));
        }
    }

    sections.push_str("\n## Next Steps\n");
    sections.push_str("- Continue monitoring; auto-updates will follow the same significance gates.\n");

    sections
}

/// `ki_domain::finding::TicketMetricsSnapshot` for the current observation,
/// persisted in the comment body so gate B can diff against it next cycle.
pub fn snapshot_for(finding: &Finding) -> TicketMetricsSnapshot {
    TicketMetricsSnapshot {
        restart_count: finding.restart_count.unwrap_or(0),
        severity_rank: finding.severity as u8,
    }
}

/// Compute `GateInputs` by diffing the current finding against the ticket's
/// last known metrics snapshot (if any).
pub fn gate_inputs_from_history(
    finding: &Finding,
    previous_severity_rank: Option<u8>,
    ticket: Option<&TicketReference>,
) -> GateInputs {
    let hours_since_last_comment = ticket
        .and_then(|t| t.last_comment_at)
        .map(|t| chrono::Utc::now().signed_duration_since(t).num_minutes() as f64 / 60.0);

    let last_metrics = ticket.and_then(|t| t.last_known_metrics);
    let delta_restart_count = match last_metrics {
        Some(m) => finding.restart_count.unwrap_or(0) as i64 - m.restart_count as i64,
        None => finding.restart_count.unwrap_or(0) as i64,
    };

    let severity_changed = match previous_severity_rank {
        Some(prev) => prev != finding.severity as u8,
        None => false,
    };

    GateInputs {
        hours_since_last_comment,
        status_changed: false,
        delta_restart_count,
        new_error_pattern: false,
        severity_changed,
        remediation_attempted: false,
        newly_resolved: false,
        first_detection: ticket.is_none(),
    }
}

/// Ticket priority mapped 1:1 from severity (§4.7 step 2).
pub fn priority_for(finding: &Finding) -> Priority {
    Priority::from(finding.severity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ki_domain::finding::{FindingKind, Severity, Tracker};

    fn finding() -> Finding {
        Finding {
            severity: Severity::High,
            cluster: "dev-eks".into(),
            namespace: "app-dev".into(),
            workload: "api".into(),
            kind: FindingKind::CrashLoopBackOff,
            evidence: vec!["7 restarts in 10m".into()],
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            restart_count: Some(9),
            replicas: Some(3),
            replicas_ready: Some(2),
            correlated_deployments: vec![],
            correlated_traffic: None,
        }
    }

    #[test]
    fn search_query_uses_exact_summary_format() {
        let f = finding();
        let q = search_query("OPS", &f);
        assert!(q.contains("[dev-eks] api: CrashLoopBackOff"));
        assert!(q.contains("project = OPS"));
    }

    #[test]
    fn first_detection_always_gates_true() {
        let inputs = GateInputs {
            hours_since_last_comment: None,
            status_changed: false,
            delta_restart_count: 0,
            new_error_pattern: false,
            severity_changed: false,
            remediation_attempted: false,
            newly_resolved: false,
            first_detection: true,
        };
        assert!(should_comment(&inputs));
    }

    #[test]
    fn small_delta_within_24h_no_comment() {
        let inputs = GateInputs {
            hours_since_last_comment: Some(2.0),
            status_changed: false,
            delta_restart_count: 2,
            new_error_pattern: false,
            severity_changed: false,
            remediation_attempted: false,
            newly_resolved: false,
            first_detection: false,
        };
        assert!(!should_comment(&inputs));
    }

    #[test]
    fn gate_a_true_after_24_hours() {
        let inputs = GateInputs {
            hours_since_last_comment: Some(24.5),
            status_changed: false,
            delta_restart_count: 19,
            new_error_pattern: false,
            severity_changed: false,
            remediation_attempted: false,
            newly_resolved: false,
            first_detection: false,
        };
        assert!(should_comment(&inputs));
    }

    #[test]
    fn gate_inputs_from_history_computes_restart_delta() {
        let f = finding();
        let ticket = TicketReference {
            tracker: Tracker::Jira,
            key: "OPS-1".into(),
            url: "https://example.atlassian.net/browse/OPS-1".into(),
            state: "Open".into(),
            last_comment_at: Some(Utc::now() - chrono::Duration::hours(25)),
            last_known_metrics: Some(TicketMetricsSnapshot {
                restart_count: 0,
                severity_rank: Severity::High as u8,
            }),
        };
        let inputs = gate_inputs_from_history(&f, Some(Severity::High as u8), Some(&ticket));
        assert_eq!(inputs.delta_restart_count, 9);
        assert!(!inputs.first_detection);
        assert!(!inputs.severity_changed);
    }

    #[test]
    fn priority_maps_from_severity() {
        assert_eq!(priority_for(&finding()), Priority::High);
    }

    #[test]
    fn format_comment_names_correlated_pr() {
        let mut f = finding();
        f.correlated_deployments.push(ki_domain::finding::CorrelatedDeployment {
            repo: "acme/api".into(),
            pr_number: 452,
            title: "lower memory limit".into(),
            merged_at: Utc::now(),
        });
        let inputs = GateInputs {
            hours_since_last_comment: None,
            status_changed: false,
            delta_restart_count: 0,
            new_error_pattern: false,
            severity_changed: false,
            remediation_attempted: false,
            newly_resolved: false,
            first_detection: true,
        };
        let body = format_comment(&f, &inputs, snapshot_for(&f));
        assert!(body.contains("## Deployment Correlation"));
        assert!(body.contains("acme/api PR #452"));
    }

    #[test]
    fn format_comment_omits_deployment_section_when_no_correlation() {
        let f = finding();
        let inputs = GateInputs {
            hours_since_last_comment: None,
            status_changed: false,
            delta_restart_count: 0,
            new_error_pattern: false,
            severity_changed: false,
            remediation_attempted: false,
            newly_resolved: false,
            first_detection: true,
        };
        let body = format_comment(&f, &inputs, snapshot_for(&f));
        assert!(!body.contains("## Deployment Correlation"));
    }
}
