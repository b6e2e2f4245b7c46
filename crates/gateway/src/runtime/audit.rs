//! The audit log — a single append-only NDJSON writer for
//! [`ki_domain::audit::AuditEntry`] records (§4.2, §4.10).
//!
//! One writer per process, serialized behind a `tokio::sync::Mutex` so
//! concurrent tool dispatch never interleaves partial lines. Never read
//! back by the system itself — `sessions.stats`/cycle reports summarize
//! their own state independently.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use ki_domain::audit::{AuditEntry, Decision};

pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<()>,
}

impl AuditLog {
    pub fn new(audit_dir: &str) -> std::io::Result<Self> {
        let dir = PathBuf::from(audit_dir);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("audit.ndjson");
        Ok(Self {
            path,
            writer: Mutex::new(()),
        })
    }

    /// Append one entry. Failure to write is logged, not propagated — a
    /// stalled audit disk must never block tool dispatch.
    pub async fn append(&self, entry: &AuditEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize audit entry");
                return;
            }
        };

        let _guard = self.writer.lock().await;
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, path = %self.path.display(), "failed to append audit entry");
        }
    }

    pub async fn record(
        &self,
        session_or_cycle_id: &str,
        tool: &str,
        arguments: &serde_json::Value,
        decision: Decision,
        reason: Option<String>,
        outcome: Option<String>,
    ) {
        let entry = AuditEntry {
            ts: chrono::Utc::now(),
            session_or_cycle_id: session_or_cycle_id.to_string(),
            tool: tool.to_string(),
            args_hash: hash_args(arguments),
            decision,
            reason,
            outcome,
        };
        self.append(&entry).await;
    }
}

/// SHA-256 digest of the canonical JSON form of a tool call's arguments,
/// so secrets passed as arguments never land in the audit trail.
pub fn hash_args(arguments: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(arguments).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().to_str().unwrap()).unwrap();

        log.record(
            "cycle-1",
            "delete_pod",
            &serde_json::json!({"name": "api-abc"}),
            Decision::Allow,
            None,
            Some("ok".into()),
        )
        .await;

        let contents = std::fs::read_to_string(dir.path().join("audit.ndjson")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.tool, "delete_pod");
        assert_eq!(parsed.decision, Decision::Allow);
    }

    #[test]
    fn hash_args_is_stable_and_does_not_leak_values() {
        let args = serde_json::json!({"token": "super-secret"});
        let h = hash_args(&args);
        assert_eq!(h.len(), 64);
        assert!(!h.contains("super-secret"));
        assert_eq!(h, hash_args(&args));
    }
}
