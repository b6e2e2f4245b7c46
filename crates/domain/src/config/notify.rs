use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Notifier & ticket correlation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub teams: Option<TeamsConfig>,
    #[serde(default)]
    pub jira: Option<JiraConfig>,
    #[serde(default)]
    pub github: Option<GithubConfig>,
    #[serde(default)]
    pub datadog: Option<DatadogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatadogConfig {
    pub site: String,
    pub api_key_env: String,
    pub app_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamsConfig {
    /// Env var holding the incoming-webhook URL.
    pub webhook_url_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    pub base_url: String,
    pub project_key: String,
    pub api_token_env: String,
    pub email: String,
    /// Gate A: minimum confidence (0.0-1.0) before a ticket is ever
    /// considered for creation or comment.
    #[serde(default = "d_gate_a")]
    pub gate_a_min_confidence: f64,
    /// Gate B: minimum similarity score against an existing open ticket's
    /// fingerprint before a finding is treated as a duplicate and
    /// commented on instead of filed as new.
    #[serde(default = "d_gate_b")]
    pub gate_b_similarity_threshold: f64,
}

fn d_gate_a() -> f64 {
    0.6
}
fn d_gate_b() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub api_token_env: String,
    pub default_owner: String,
    pub default_repo: String,
}
