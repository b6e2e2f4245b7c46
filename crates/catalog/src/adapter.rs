//! The `ToolAdapter` port — one implementation per external system.

use ki_domain::tool::{ToolDefinition, ToolOutcome};
use serde_json::Value;

/// A uniform typed wrapper around one external system (Kubernetes, GitHub,
/// AWS, Datadog, Jira, Teams). Mirrors `LlmProvider`'s one-trait-per-backend
/// split: the catalog doesn't know or care which adapter services a call,
/// only that every adapter speaks this same shape.
#[async_trait::async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Tool descriptors this adapter contributes to the catalog.
    fn descriptors(&self) -> Vec<ToolDefinition>;

    /// Invoke one of this adapter's tools by name. `tool_name` is always one
    /// this adapter declared in `descriptors()` — the catalog only routes
    /// here after a table lookup.
    async fn invoke(&self, call_id: &str, tool_name: &str, arguments: Value) -> ToolOutcome;

    /// Best-effort lookup of a destructive call's target's current replica
    /// count, for the Safety Hook Chain's replica-floor and scale-delta
    /// rules (§4.2). Adapters with no notion of "replicas" (GitHub, Jira,
    /// AWS, Datadog, Teams) use this default no-op; only the Kubernetes
    /// adapter overrides it.
    async fn current_replicas(&self, _arguments: &Value) -> Option<i64> {
        None
    }
}
