use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Idle TTL for on-demand query sessions. The orchestrator session is
    /// persistent and never TTL-evicted — only size-pruned.
    #[serde(default = "d_ttl_minutes")]
    pub query_ttl_minutes: i64,
    /// How often the TTL sweeper runs.
    #[serde(default = "d_sweep_secs")]
    pub sweep_interval_seconds: u64,
    /// Hard cap on total query sessions; oldest-by-last-used is evicted
    /// once the cap is exceeded.
    #[serde(default = "d_max_sessions")]
    pub max_sessions: usize,
    /// Token budget a session's `messages` may occupy before the deterministic
    /// pruner runs. The pruner triggers at `prune_trigger_ratio` of this value.
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u64,
    /// Fraction of `max_tokens` at which the pruner triggers (e.g. 0.8 = 80%).
    #[serde(default = "d_prune_trigger_ratio")]
    pub prune_trigger_ratio: f64,
    #[serde(default)]
    pub pruning: super::pruning::PruningConfig,
    /// Directory session snapshots are persisted under.
    #[serde(default = "d_state_dir")]
    pub state_dir: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            query_ttl_minutes: d_ttl_minutes(),
            sweep_interval_seconds: d_sweep_secs(),
            max_sessions: d_max_sessions(),
            max_tokens: d_max_tokens(),
            prune_trigger_ratio: d_prune_trigger_ratio(),
            pruning: super::pruning::PruningConfig::default(),
            state_dir: d_state_dir(),
        }
    }
}

fn d_ttl_minutes() -> i64 {
    30
}
fn d_sweep_secs() -> u64 {
    60
}
fn d_max_sessions() -> usize {
    1000
}
fn d_max_tokens() -> u64 {
    120_000
}
fn d_prune_trigger_ratio() -> f64 {
    0.8
}
fn d_state_dir() -> String {
    "state/sessions".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_query_ttl_is_thirty_minutes() {
        assert_eq!(SessionsConfig::default().query_ttl_minutes, 30);
    }

    #[test]
    fn sweep_interval_within_contract() {
        assert!(SessionsConfig::default().sweep_interval_seconds <= 60);
    }

    #[test]
    fn default_hard_cap_is_one_thousand() {
        assert_eq!(SessionsConfig::default().max_sessions, 1000);
    }

    #[test]
    fn default_prune_trigger_is_eighty_percent() {
        assert_eq!(SessionsConfig::default().prune_trigger_ratio, 0.8);
    }
}
