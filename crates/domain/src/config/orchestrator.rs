use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Monitoring Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Fixed interval between monitoring cycles. A tick is skipped rather
    /// than queued if the previous cycle is still running.
    #[serde(default = "d_interval_secs")]
    pub cycle_interval_seconds: u64,
    /// Per-cycle budget enforced by the LLM driver.
    #[serde(default)]
    pub budget: BudgetConfig,
    /// Kinds of remediation the orchestrator may perform without a human
    /// approving first. Conservative by default — empty means "propose
    /// only, never act".
    #[serde(default)]
    pub approved_auto_remediation: Vec<String>,
    /// Directory the atomic Cycle Report writer targets.
    #[serde(default = "d_reports_dir")]
    pub reports_dir: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cycle_interval_seconds: d_interval_secs(),
            budget: BudgetConfig::default(),
            approved_auto_remediation: Vec::new(),
            reports_dir: d_reports_dir(),
        }
    }
}

/// The Budget triple the LLM driver enforces on every `advance()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "d_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens_per_advance: u32,
    #[serde(default = "d_wall_clock_secs")]
    pub wall_clock_deadline_secs: u64,
    /// Maximum number of read-category tool calls dispatched concurrently
    /// within one LLM turn.
    #[serde(default = "d_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: d_max_tool_calls(),
            max_tokens_per_advance: d_max_tokens(),
            wall_clock_deadline_secs: d_wall_clock_secs(),
            max_concurrent_reads: d_max_concurrent_reads(),
        }
    }
}

fn d_interval_secs() -> u64 {
    900
}
fn d_reports_dir() -> String {
    "state/cycles".into()
}
fn d_max_tool_calls() -> u32 {
    25
}
fn d_max_tokens() -> u32 {
    200_000
}
fn d_wall_clock_secs() -> u64 {
    300
}
fn d_max_concurrent_reads() -> usize {
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cycle_interval_is_fifteen_minutes() {
        assert_eq!(OrchestratorConfig::default().cycle_interval_seconds, 900);
    }

    #[test]
    fn default_auto_remediation_is_empty() {
        assert!(OrchestratorConfig::default().approved_auto_remediation.is_empty());
    }

    #[test]
    fn default_budget_read_concurrency_matches_turn_loop_cap() {
        assert_eq!(BudgetConfig::default().max_concurrent_reads, 8);
    }
}
