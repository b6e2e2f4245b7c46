//! The Cycle Report — the per-cycle artifact the Monitoring Orchestrator
//! writes atomically (tmp+rename) at the end of every cycle (§3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::finding::Finding;

/// One action the orchestrator took (or decided not to take) on a finding
/// during a cycle — used for both the cycle report and operator-visible
/// reasoning about "why nothing happened".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleAction {
    pub finding_fingerprint: String,
    pub kind: CycleActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleActionKind {
    TicketCreated,
    TicketCommented,
    TicketSkipped,
    NotificationSent,
    RemediationAttempted,
    RemediationSkipped,
    Error,
}

/// `{cycle_id, started_at, finished_at, findings[], actions_taken[],
/// tickets_touched[], tokens_used, duration_ms}` per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub cluster: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub findings: Vec<Finding>,
    pub actions_taken: Vec<CycleAction>,
    pub tickets_touched: Vec<String>,
    pub tokens_used: u64,
    pub duration_ms: u64,
    /// Set when the cycle hit its wall-clock budget before finishing every
    /// finding — the report still gets written, just incompletely (§4.6,
    /// §8 boundary behavior: "cycle writes a partial report, does not panic").
    #[serde(default)]
    pub partial: bool,
}

impl CycleReport {
    pub fn started(cycle_id: String, cluster: String) -> Self {
        Self {
            cycle_id,
            cluster,
            started_at: Utc::now(),
            finished_at: None,
            findings: Vec::new(),
            actions_taken: Vec::new(),
            tickets_touched: Vec::new(),
            tokens_used: 0,
            duration_ms: 0,
            partial: false,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "cycle-report-{}.json",
            self.started_at.format("%Y%m%dT%H%M%SZ")
        )
    }
}
