use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subagent Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for one delegatable subagent profile (diagnostics,
/// log-analyzer, remediation, cost-optimizer, github, jira, ...).
///
/// Adding a seventh profile is a config change, not a code change — the
/// registry builds its set of profiles from this map at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Human-readable description shown in the orchestrator's delegation
    /// prompt.
    #[serde(default)]
    pub description: String,
    /// Tool allow/deny policy scoping this profile to the systems it needs.
    #[serde(default)]
    pub tool_policy: ToolPolicy,
    /// Role -> model override (e.g. `{ executor = "anthropic/claude-opus-4" }`).
    /// Falls back to the global `[llm.roles]` entry when absent.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Fan-out / recursion limits for this profile.
    #[serde(default)]
    pub limits: AgentLimits,
}

/// Hard ceilings on delegation to prevent runaway subagent trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Maximum nesting depth (orchestrator -> subagent -> grandchild).
    #[serde(default = "d_2")]
    pub max_depth: u32,
    /// Maximum number of delegations within a single parent turn.
    #[serde(default = "d_5")]
    pub max_children_per_turn: u32,
    /// Wall-clock timeout per delegated run.
    #[serde(default = "d_120000")]
    pub max_duration_ms: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_children_per_turn: 5,
            max_duration_ms: 120_000,
        }
    }
}

/// Tool allow/deny policy — prefix-based matching, deny always wins.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    /// Tool name prefixes this profile may use. `["*"]` or empty = unrestricted.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tool name prefixes this profile is denied (evaluated before allow).
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    /// Check whether the given tool name is permitted by this policy.
    ///
    /// Matching is case-insensitive. Deny always wins over allow.
    pub fn allows(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();

        for d in &self.deny {
            let d_lower = d.to_ascii_lowercase();
            if d_lower == "*" || name == d_lower || name.starts_with(&format!("{d_lower}.")) {
                return false;
            }
        }
        if self.allow.is_empty() || self.allow.iter().any(|a| a == "*") {
            return true;
        }
        for a in &self.allow {
            let a_lower = a.to_ascii_lowercase();
            if name == a_lower || name.starts_with(&format!("{a_lower}.")) {
                return true;
            }
        }
        false
    }
}

fn d_2() -> u32 {
    2
}
fn d_5() -> u32 {
    5
}
fn d_120000() -> u64 {
    120_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_policy_empty_allows_all() {
        let policy = ToolPolicy::default();
        assert!(policy.allows("k8s.get_pods"));
        assert!(policy.allows("github.create_issue"));
    }

    #[test]
    fn tool_policy_allow_restricts() {
        let policy = ToolPolicy {
            allow: vec!["k8s".into()],
            deny: vec![],
        };
        assert!(policy.allows("k8s.get_pods"));
        assert!(!policy.allows("github.create_issue"));
    }

    #[test]
    fn tool_policy_deny_takes_precedence() {
        let policy = ToolPolicy {
            allow: vec!["*".into()],
            deny: vec!["k8s.delete_pod".into()],
        };
        assert!(!policy.allows("k8s.delete_pod"));
        assert!(policy.allows("k8s.get_pods"));
    }

    #[test]
    fn tool_policy_case_insensitive() {
        let policy = ToolPolicy {
            allow: vec!["K8s".into()],
            deny: vec![],
        };
        assert!(policy.allows("k8s.get_pods"));
        assert!(policy.allows("K8S.GET_PODS"));
    }

    #[test]
    fn agent_limits_defaults_are_conservative() {
        let limits = AgentLimits::default();
        assert_eq!(limits.max_depth, 2);
        assert_eq!(limits.max_children_per_turn, 5);
    }
}
