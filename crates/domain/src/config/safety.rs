use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Safety Hook Chain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Tool name prefixes that are always denied, regardless of category
    /// (deny always wins, same precedence rule as `ToolPolicy`).
    #[serde(default)]
    pub deny: Vec<String>,
    /// Tool name prefixes classified destructive even if the adapter
    /// itself reports a different category — an override valve for
    /// operators who want to be stricter than the catalog's defaults.
    #[serde(default)]
    pub force_destructive: Vec<String>,
    /// Window, in minutes, during which repeated notifications for the
    /// same `(severity, component, kind)` are suppressed rather than
    /// re-sent.
    #[serde(default = "d_notify_window")]
    pub notify_dedup_minutes: i64,
    /// Directory the append-only audit NDJSON log is written to.
    #[serde(default = "d_audit_dir")]
    pub audit_dir: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            deny: Vec::new(),
            force_destructive: Vec::new(),
            notify_dedup_minutes: d_notify_window(),
            audit_dir: d_audit_dir(),
        }
    }
}

fn d_notify_window() -> i64 {
    15
}
fn d_audit_dir() -> String {
    "state/audit".into()
}
