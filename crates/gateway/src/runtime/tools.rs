//! Tool definition assembly — merges the [`ki_catalog::ToolCatalog`]'s
//! provider-backed tools with the two meta tools that don't talk to an
//! external system: `agent.run` and `agent.list` (§4.4).

use serde_json::Value;

use ki_domain::config::ToolPolicy;
use ki_domain::tool::{ToolCategory, ToolDefinition};

use crate::state::AppState;

/// Build the tool set exposed to the model for one turn. When `tool_policy`
/// is `Some` (a sub-agent turn), definitions are filtered through it first.
pub fn build_tool_definitions(state: &AppState, tool_policy: Option<&ToolPolicy>) -> Vec<ToolDefinition> {
    let mut defs: Vec<ToolDefinition> = state.catalog.descriptors().to_vec();

    if let Some(agents) = &state.agents {
        if !agents.is_empty() {
            defs.push(ToolDefinition {
                name: "agent.run".into(),
                description: "Delegate a task to a specialist sub-agent profile. The sub-agent \
                    runs its own bounded turn with its own tool policy and model mapping. \
                    Returns the sub-agent's final answer."
                    .into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "agent_id": { "type": "string", "description": "ID of the agent to run (from agent.list)" },
                        "task": { "type": "string", "description": "The task to hand off" },
                        "model": { "type": "string", "description": "Optional model override, e.g. 'anthropic/claude-opus-4'" }
                    },
                    "required": ["agent_id", "task"]
                }),
                category: ToolCategory::Read,
                target_system: "internal".into(),
            });
            defs.push(ToolDefinition {
                name: "agent.list".into(),
                description: "List the configured sub-agent profiles and their tool policies.".into(),
                parameters: serde_json::json!({ "type": "object", "properties": {} }),
                category: ToolCategory::Read,
                target_system: "internal".into(),
            });
        }
    }

    if let Some(policy) = tool_policy {
        defs.retain(|d| policy.allows(&d.name));
    }

    defs
}

pub async fn dispatch_agent_run(
    state: &AppState,
    arguments: &Value,
    parent_turn_id: &str,
    tool_defs: Vec<ToolDefinition>,
) -> (String, bool) {
    let agent_id = match arguments.get("agent_id").and_then(|v| v.as_str()) {
        Some(id) => id,
        None => return ("missing required argument: agent_id".into(), true),
    };
    let task = match arguments.get("task").and_then(|v| v.as_str()) {
        Some(t) => t,
        None => return ("missing required argument: task".into(), true),
    };
    let model = arguments.get("model").and_then(|v| v.as_str()).map(String::from);

    let (content, is_error, _tokens_used) =
        super::agent::run_agent(state, agent_id, task, model, parent_turn_id, tool_defs).await;
    (content, is_error)
}

pub fn dispatch_agent_list(state: &AppState) -> (String, bool) {
    let manager = match &state.agents {
        Some(m) => m,
        None => return (serde_json::json!({ "agents": [], "count": 0 }).to_string(), false),
    };

    let agents: Vec<_> = manager
        .list()
        .into_iter()
        .filter_map(|id| manager.get(&id).map(|r| (id, r)))
        .map(|(id, r)| {
            serde_json::json!({
                "id": id,
                "description": r.config.description,
                "tools_allow": r.config.tool_policy.allow,
                "tools_deny": r.config.tool_policy.deny,
                "models": r.config.models,
            })
        })
        .collect();

    (
        serde_json::json!({ "agents": agents, "count": agents.len() }).to_string(),
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_filter_drops_denied_tools() {
        let defs = vec![
            ToolDefinition {
                name: "list_pods".into(),
                description: "".into(),
                parameters: serde_json::json!({}),
                category: ToolCategory::Read,
                target_system: "kubernetes".into(),
            },
            ToolDefinition {
                name: "delete_pod".into(),
                description: "".into(),
                parameters: serde_json::json!({}),
                category: ToolCategory::Destructive,
                target_system: "kubernetes".into(),
            },
        ];
        let policy = ToolPolicy {
            allow: vec![],
            deny: vec!["delete_pod".into()],
        };
        let mut defs = defs;
        defs.retain(|d| policy.allows(&d.name));
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "list_pods");
    }
}
