//! [`ToolCatalog`]: registers every adapter's descriptors at startup and
//! dispatches `invoke(name, args)` by table lookup, mirroring the shape of
//! the teacher's `dispatch_tool` — match the name against a registry,
//! fall through to an "unknown tool" error if nothing claims it.

use std::collections::HashMap;

use serde_json::Value;

use ki_domain::error::ToolErrorKind;
use ki_domain::tool::{ToolCategory, ToolDefinition, ToolOutcome};

use crate::adapter::ToolAdapter;
use crate::retry::with_backoff;

pub struct ToolCatalog {
    adapters: Vec<Box<dyn ToolAdapter>>,
    /// tool name -> index into `adapters`.
    index: HashMap<String, usize>,
    descriptors: Vec<ToolDefinition>,
}

impl ToolCatalog {
    /// Build a catalog from whichever adapters were constructed for this
    /// process (adapters for unconfigured systems — e.g. no Jira config —
    /// are simply omitted by the caller).
    pub fn new(adapters: Vec<Box<dyn ToolAdapter>>) -> Self {
        let mut index = HashMap::new();
        let mut descriptors: Vec<ToolDefinition> = Vec::new();
        // name -> position in `descriptors`, so a duplicate name overwrites
        // in place instead of leaving the earlier adapter's schema stranded
        // alongside the winner's.
        let mut descriptor_pos: HashMap<String, usize> = HashMap::new();

        for (i, adapter) in adapters.iter().enumerate() {
            for descriptor in adapter.descriptors() {
                let name = descriptor.name.clone();
                match descriptor_pos.get(&name) {
                    Some(&pos) => {
                        tracing::warn!(
                            tool = %name,
                            "duplicate tool name registered in catalog, last adapter wins"
                        );
                        descriptors[pos] = descriptor;
                    }
                    None => {
                        descriptor_pos.insert(name.clone(), descriptors.len());
                        descriptors.push(descriptor);
                    }
                }
                index.insert(name, i);
            }
        }

        Self {
            adapters,
            index,
            descriptors,
        }
    }

    /// All tool descriptors the catalog can currently dispatch, for
    /// advertising to an LLM or filtering through a `ToolPolicy`.
    pub fn descriptors(&self) -> &[ToolDefinition] {
        &self.descriptors
    }

    pub fn category_of(&self, tool_name: &str) -> Option<ToolCategory> {
        self.descriptors
            .iter()
            .find(|d| d.name == tool_name)
            .map(|d| d.category)
    }

    /// Best-effort current-replica lookup for the Safety Hook Chain, routed
    /// to whichever adapter owns `tool_name`. Returns `None` for an unknown
    /// tool or an adapter with no notion of replicas.
    pub async fn current_replicas(&self, tool_name: &str, arguments: &Value) -> Option<i64> {
        let &idx = self.index.get(tool_name)?;
        self.adapters[idx].current_replicas(arguments).await
    }

    /// Dispatch a single call by name, retrying transient (throttled/timeout)
    /// failures with backoff. Callers are expected to have already passed
    /// the call through the safety hook chain.
    pub async fn invoke(&self, call_id: &str, tool_name: &str, arguments: Value) -> ToolOutcome {
        let Some(&idx) = self.index.get(tool_name) else {
            return ToolOutcome::error(
                call_id,
                ToolErrorKind::NotFound,
                format!("unknown tool '{tool_name}'"),
            );
        };

        let adapter = &self.adapters[idx];
        with_backoff(|| adapter.invoke(call_id, tool_name, arguments.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAdapter {
        name: &'static str,
        category: ToolCategory,
        replicas: Option<i64>,
    }

    impl StubAdapter {
        fn new(name: &'static str, category: ToolCategory) -> Self {
            Self { name, category, replicas: None }
        }
    }

    #[async_trait::async_trait]
    impl ToolAdapter for StubAdapter {
        fn descriptors(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: self.name.into(),
                description: "stub".into(),
                parameters: serde_json::json!({}),
                category: self.category,
                target_system: "stub".into(),
            }]
        }

        async fn invoke(&self, call_id: &str, tool_name: &str, _arguments: Value) -> ToolOutcome {
            ToolOutcome::ok(call_id, format!("handled {tool_name}"))
        }

        async fn current_replicas(&self, _arguments: &Value) -> Option<i64> {
            self.replicas
        }
    }

    #[tokio::test]
    async fn dispatches_by_registered_name() {
        let catalog = ToolCatalog::new(vec![Box::new(StubAdapter::new("list_pods", ToolCategory::Read))]);

        let outcome = catalog.invoke("c1", "list_pods", serde_json::json!({})).await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.content, "handled list_pods");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let catalog = ToolCatalog::new(vec![]);
        let outcome = catalog.invoke("c1", "nope", serde_json::json!({})).await;
        assert!(outcome.is_error);
        assert_eq!(outcome.error_kind, Some(ToolErrorKind::NotFound));
    }

    #[test]
    fn category_of_known_tool() {
        let catalog = ToolCatalog::new(vec![Box::new(StubAdapter::new("delete_pod", ToolCategory::Destructive))]);
        assert_eq!(catalog.category_of("delete_pod"), Some(ToolCategory::Destructive));
        assert_eq!(catalog.category_of("missing"), None);
    }

    #[test]
    fn descriptors_aggregate_across_adapters() {
        let catalog = ToolCatalog::new(vec![
            Box::new(StubAdapter::new("a", ToolCategory::Read)),
            Box::new(StubAdapter::new("b", ToolCategory::Write)),
        ]);
        let names: Vec<&str> = catalog.descriptors().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_tool_name_last_adapter_wins_and_is_not_duplicated() {
        let catalog = ToolCatalog::new(vec![
            Box::new(StubAdapter::new("create_issue", ToolCategory::Write)),
            Box::new(StubAdapter { name: "create_issue", category: ToolCategory::Write, replicas: Some(7) }),
        ]);
        let matches: Vec<_> = catalog.descriptors().iter().filter(|d| d.name == "create_issue").collect();
        assert_eq!(matches.len(), 1, "duplicate name must overwrite, not accumulate");
    }

    #[tokio::test]
    async fn current_replicas_routes_to_owning_adapter() {
        let catalog = ToolCatalog::new(vec![
            Box::new(StubAdapter::new("list_pods", ToolCategory::Read)),
            Box::new(StubAdapter { name: "scale_deployment", category: ToolCategory::Destructive, replicas: Some(3) }),
        ]);
        let replicas = catalog.current_replicas("scale_deployment", &serde_json::json!({})).await;
        assert_eq!(replicas, Some(3));
        assert_eq!(catalog.current_replicas("list_pods", &serde_json::json!({})).await, None);
        assert_eq!(catalog.current_replicas("missing", &serde_json::json!({})).await, None);
    }
}
