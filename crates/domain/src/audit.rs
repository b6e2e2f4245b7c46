//! The Audit Entry — what the Safety Hook Chain's logger stage appends to
//! the durable, append-only NDJSON log. Never read by the system itself,
//! only by humans (§3, §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

/// One append-only audit record for a single tool invocation.
///
/// `args_hash` carries a SHA-256 digest of the call's arguments rather than
/// the arguments themselves, so secrets passed as tool arguments never land
/// in the audit trail (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub session_or_cycle_id: String,
    pub tool: String,
    pub args_hash: String,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}
