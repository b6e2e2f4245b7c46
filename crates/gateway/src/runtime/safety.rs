//! The Safety Hook Chain — every tool call dispatched by the LLM Driver,
//! a subagent, or the Monitoring Orchestrator passes through here before
//! it reaches [`ki_catalog::ToolCatalog::invoke`] (§4.2).
//!
//! Stages: Pending → Validated → Logged → Notified → Allow | Deny. Each
//! stage is a plain function; [`SafetyChain::check`] runs all of them and
//! returns the final verdict. A `Deny` verdict short-circuits the caller
//! before any tool adapter runs — the denied call never reaches the
//! network.

use serde_json::Value;

use ki_domain::audit::Decision;
use ki_domain::cluster_guard::ClusterGuard;
use ki_domain::config::ClusterConfig;
use ki_domain::config::SafetyConfig;
use ki_domain::tool::ToolCategory;
use ki_domain::trace::TraceEvent;

use super::audit::AuditLog;
use super::notifier::Notifier;

/// Tool names that are never allowed, regardless of configuration.
const HARD_DENIED_TOOLS: &[&str] = &["delete_namespace", "delete_pv"];

/// Fragments that mark a string argument value as secret-shaped.
const SECRET_FRAGMENTS: &[&str] = &["secret", "credential", ".env", "token"];

/// Everything the validator needs about the call site that isn't carried
/// in the tool arguments themselves. Fields the caller cannot supply
/// (because the relevant read hasn't happened yet) are left `None` —
/// the corresponding rule then allows rather than blocking on ignorance.
#[derive(Debug, Default, Clone)]
pub struct SafetyContext {
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    /// Current replica count of the targeted Deployment, when known.
    pub current_replicas: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SafetyVerdict {
    pub decision: Decision,
    pub reason: Option<String>,
}

impl SafetyVerdict {
    fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

pub struct SafetyChain {
    audit: std::sync::Arc<AuditLog>,
    notifier: std::sync::Arc<Notifier>,
    cluster_guard: ClusterGuard,
    protected_namespaces: Vec<String>,
    deny_patterns: Vec<String>,
    force_destructive: Vec<String>,
}

impl SafetyChain {
    pub fn new(
        audit: std::sync::Arc<AuditLog>,
        notifier: std::sync::Arc<Notifier>,
        cluster_guard: ClusterGuard,
        cluster_config: &ClusterConfig,
        safety_config: &SafetyConfig,
    ) -> Self {
        Self {
            audit,
            notifier,
            cluster_guard,
            protected_namespaces: cluster_config.protected_namespaces.clone(),
            deny_patterns: safety_config.deny.clone(),
            force_destructive: safety_config.force_destructive.clone(),
        }
    }

    /// `session_or_cycle_id` identifies the caller for the audit trail —
    /// an HTTP session id, an `agent:<id>:task:<uuid>` delegation key, or
    /// the Monitoring Orchestrator's cycle id.
    pub async fn check(
        &self,
        session_or_cycle_id: &str,
        tool_name: &str,
        category: ToolCategory,
        arguments: &Value,
        ctx: &SafetyContext,
    ) -> SafetyVerdict {
        // ── Validated ────────────────────────────────────────────────
        let category = self.effective_category(tool_name, category);
        let verdict = self.validate(tool_name, category, arguments, ctx);

        if verdict.decision == Decision::Deny {
            TraceEvent::SafetyDenied {
                tool_name: tool_name.to_string(),
                rule: verdict.reason.clone().unwrap_or_default(),
            }
            .emit();
        }

        // ── Logged ───────────────────────────────────────────────────
        self.audit
            .record(
                session_or_cycle_id,
                tool_name,
                arguments,
                verdict.decision,
                verdict.reason.clone(),
                None,
            )
            .await;

        // ── Notified ─────────────────────────────────────────────────
        // Every deny, and every allowed destructive call, gets a
        // notification — operators should know what happened even when
        // nothing went wrong.
        if verdict.decision == Decision::Deny {
            self.notifier
                .notify_safety_denial(tool_name, verdict.reason.as_deref().unwrap_or(""))
                .await;
        } else if category == ToolCategory::Destructive {
            self.notifier
                .notify_destructive_allowed(tool_name, arguments)
                .await;
        }

        verdict
    }

    /// `force_destructive` lets operators widen the Destructive category
    /// past what a tool adapter declares, for tools the catalog marks
    /// Write but an operator wants serialized and notified like a
    /// destructive action (§4.2).
    fn effective_category(&self, tool_name: &str, category: ToolCategory) -> ToolCategory {
        if category != ToolCategory::Destructive
            && self
                .force_destructive
                .iter()
                .any(|d| tool_name.eq_ignore_ascii_case(d))
        {
            ToolCategory::Destructive
        } else {
            category
        }
    }

    fn validate(
        &self,
        tool_name: &str,
        category: ToolCategory,
        arguments: &Value,
        ctx: &SafetyContext,
    ) -> SafetyVerdict {
        let name_lower = tool_name.to_ascii_lowercase();

        // Rule: tool names that are never allowed.
        if HARD_DENIED_TOOLS.iter().any(|t| *t == name_lower)
            || name_lower.contains("clusterrole")
        {
            return SafetyVerdict::deny(format!("'{tool_name}' is permanently denied"));
        }

        // Rule: operator-configured deny-list, prefix matched like ToolPolicy.
        if self
            .deny_patterns
            .iter()
            .any(|d| matches_tool(&name_lower, d))
        {
            return SafetyVerdict::deny(format!("'{tool_name}' matches the configured deny-list"));
        }

        // Rule: destructive action against a cluster outside the allow-list.
        if category == ToolCategory::Destructive {
            if let Some(cluster) = ctx.cluster.as_deref() {
                if self.cluster_guard.require(cluster).is_err() {
                    return SafetyVerdict::deny(format!(
                        "cluster '{cluster}' is not in the allow-list"
                    ));
                }
            }
        }

        // Rule: write/destructive action against a protected namespace.
        if category != ToolCategory::Read {
            if let Some(ns) = ctx.namespace.as_deref() {
                if self.protected_namespaces.iter().any(|p| p == ns) {
                    return SafetyVerdict::deny(format!(
                        "namespace '{ns}' is protected from write/destructive actions"
                    ));
                }
            }
        }

        // Rule: rollout_restart against a Deployment with fewer than 2
        // replicas (no redundancy to absorb the restart).
        if name_lower == "rollout_restart" {
            if let Some(current) = ctx.current_replicas {
                if current < 2 {
                    return SafetyVerdict::deny(
                        "rollout_restart denied: deployment has fewer than 2 replicas",
                    );
                }
            }
        }

        // Rule: scale_deployment with a swing of more than 2 replicas in
        // either direction.
        if name_lower == "scale_deployment" {
            if let (Some(current), Some(target)) =
                (ctx.current_replicas, arguments.get("replicas").and_then(|v| v.as_i64()))
            {
                if (target - current).abs() > 2 {
                    return SafetyVerdict::deny(format!(
                        "scale_deployment denied: delta of {} replicas exceeds the allowed range of 2",
                        (target - current).abs()
                    ));
                }
            }
        }

        // Rule: delete_pod inside a system namespace (kube-system et al.
        // are already covered by the protected-namespace rule above, but
        // this also fires when the system namespace isn't in config).
        if name_lower == "delete_pod" {
            if let Some(ns) = ctx.namespace.as_deref() {
                if ns.starts_with("kube-") {
                    return SafetyVerdict::deny(format!(
                        "delete_pod denied: '{ns}' is a system namespace"
                    ));
                }
            }
        }

        // Rule: any string argument that looks like it names a secret.
        if let Some(hit) = find_secret_like_string(arguments) {
            return SafetyVerdict::deny(format!(
                "argument value '{hit}' looks like a secret/credential path"
            ));
        }

        SafetyVerdict::allow()
    }
}

fn matches_tool(name_lower: &str, pattern: &str) -> bool {
    let p = pattern.to_ascii_lowercase();
    name_lower == p || name_lower.starts_with(&format!("{p}."))
}

fn find_secret_like_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let lower = s.to_ascii_lowercase();
            SECRET_FRAGMENTS
                .iter()
                .any(|f| lower.contains(f))
                .then(|| s.clone())
        }
        Value::Array(items) => items.iter().find_map(find_secret_like_string),
        Value::Object(map) => map.values().find_map(find_secret_like_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ki_domain::config::{ClusterConfig, SafetyConfig};

    async fn chain(tmp: &std::path::Path) -> SafetyChain {
        let audit = std::sync::Arc::new(AuditLog::new(tmp.to_str().unwrap()).unwrap());
        let notifier = std::sync::Arc::new(Notifier::new(15));
        let cluster_guard = ClusterGuard::new(vec!["dev-eks".into()]);
        let cluster_config = ClusterConfig {
            allow_list: vec!["dev-eks".into()],
            ..Default::default()
        };
        let safety_config = SafetyConfig::default();
        SafetyChain::new(audit, notifier, cluster_guard, &cluster_config, &safety_config)
    }

    #[tokio::test]
    async fn hard_denied_tool_is_always_denied() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(dir.path()).await;
        let verdict = chain
            .check(
                "cycle-1",
                "delete_namespace",
                ToolCategory::Destructive,
                &serde_json::json!({}),
                &SafetyContext::default(),
            )
            .await;
        assert!(!verdict.is_allowed());
    }

    #[tokio::test]
    async fn destructive_against_unlisted_cluster_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(dir.path()).await;
        let ctx = SafetyContext {
            cluster: Some("prod-eks".into()),
            ..Default::default()
        };
        let verdict = chain
            .check(
                "cycle-1",
                "delete_pod",
                ToolCategory::Destructive,
                &serde_json::json!({"namespace": "app"}),
                &ctx,
            )
            .await;
        assert!(!verdict.is_allowed());
    }

    #[tokio::test]
    async fn read_tool_against_allow_listed_cluster_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(dir.path()).await;
        let ctx = SafetyContext {
            cluster: Some("dev-eks".into()),
            namespace: Some("app".into()),
            ..Default::default()
        };
        let verdict = chain
            .check(
                "cycle-1",
                "list_pods",
                ToolCategory::Read,
                &serde_json::json!({}),
                &ctx,
            )
            .await;
        assert!(verdict.is_allowed());
    }

    #[tokio::test]
    async fn scale_deployment_large_delta_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(dir.path()).await;
        let ctx = SafetyContext {
            cluster: Some("dev-eks".into()),
            namespace: Some("app".into()),
            current_replicas: Some(2),
        };
        let verdict = chain
            .check(
                "cycle-1",
                "scale_deployment",
                ToolCategory::Destructive,
                &serde_json::json!({"replicas": 10}),
                &ctx,
            )
            .await;
        assert!(!verdict.is_allowed());
    }

    #[tokio::test]
    async fn secret_like_argument_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(dir.path()).await;
        let verdict = chain
            .check(
                "cycle-1",
                "apply_manifest",
                ToolCategory::Destructive,
                &serde_json::json!({"path": "/etc/app/.env"}),
                &SafetyContext::default(),
            )
            .await;
        assert!(!verdict.is_allowed());
    }

    #[tokio::test]
    async fn protected_namespace_blocks_writes() {
        let dir = tempfile::tempdir().unwrap();
        let chain = chain(dir.path()).await;
        let ctx = SafetyContext {
            cluster: Some("dev-eks".into()),
            namespace: Some("kube-system".into()),
            ..Default::default()
        };
        let verdict = chain
            .check(
                "cycle-1",
                "rollout_restart",
                ToolCategory::Destructive,
                &serde_json::json!({"deployment": "coredns"}),
                &ctx,
            )
            .await;
        assert!(!verdict.is_allowed());
    }
}
