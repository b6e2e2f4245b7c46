//! Notifier — the rate-limited alert sink shared by the Safety Hook
//! Chain and the Monitoring Orchestrator's escalation step (§4.2, §4.6).
//!
//! Dedup key is `(kind, component)`; a repeat within `notify_dedup_minutes`
//! (from [`ki_domain::config::SafetyConfig::notify_dedup_minutes`]) is
//! swallowed rather than re-sent. Actual outbound delivery (Teams webhook,
//! ticket comment) is the caller's job — dispatched as an ordinary tool
//! call through the same catalog, so it goes through the same safety
//! chain and audit trail as everything else. This type only answers
//! "have we already told someone about this recently?" and emits the
//! structured log line operators grep for.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub struct Notifier {
    dedup_minutes: i64,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Notifier {
    pub fn new(dedup_minutes: i64) -> Self {
        Self {
            dedup_minutes,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if this notification was allowed through (not a
    /// dedup suppression), in which case the caller should actually
    /// deliver it.
    pub fn should_send(&self, kind: &str, component: &str) -> bool {
        let key = format!("{kind}:{component}");
        let now = Utc::now();
        let mut map = self.last_sent.lock();
        match map.get(&key) {
            Some(last) if now.signed_duration_since(*last).num_minutes() < self.dedup_minutes => {
                false
            }
            _ => {
                map.insert(key, now);
                true
            }
        }
    }

    pub async fn notify_safety_denial(&self, tool_name: &str, reason: &str) {
        if self.should_send("safety_denied", tool_name) {
            tracing::warn!(tool_name, reason, "safety chain denied tool call");
        }
    }

    pub async fn notify_destructive_allowed(&self, tool_name: &str, arguments: &serde_json::Value) {
        if self.should_send("destructive_allowed", tool_name) {
            tracing::warn!(
                tool_name,
                arguments = %arguments,
                "destructive tool call allowed"
            );
        }
    }

    pub async fn notify_escalation(&self, cluster: &str, workload: &str, severity: &str, message: &str) {
        let component = format!("{cluster}/{workload}");
        if self.should_send(severity, &component) {
            tracing::warn!(cluster, workload, severity, message, "incident escalation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_notification_always_sends() {
        let n = Notifier::new(15);
        assert!(n.should_send("safety_denied", "delete_pod"));
    }

    #[test]
    fn repeat_within_window_is_deduped() {
        let n = Notifier::new(15);
        assert!(n.should_send("safety_denied", "delete_pod"));
        assert!(!n.should_send("safety_denied", "delete_pod"));
    }

    #[test]
    fn different_components_do_not_share_dedup_state() {
        let n = Notifier::new(15);
        assert!(n.should_send("safety_denied", "delete_pod"));
        assert!(n.should_send("safety_denied", "scale_deployment"));
    }
}
