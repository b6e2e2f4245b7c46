//! Subagent registry — the Planner's `agent.run` tool delegates a task to
//! a named specialist profile, each with its own tool policy and model
//! mapping (§4.4).
//!
//! A sub-agent is not a separate process or a separate model: it's a
//! [`ki_domain::config::AgentConfig`] applied to one more [`run_turn`]
//! call, in a child session keyed off the parent's so cancellation
//! cascades.

use std::collections::HashMap;
use std::sync::Arc;

use ki_domain::config::{AgentConfig, ToolPolicy};
use ki_domain::tool::Message;

use crate::state::AppState;

use super::turn::{run_turn, TurnInput, TurnOutcome};

/// Per-agent overrides threaded into a turn.
#[derive(Clone)]
pub struct AgentContext {
    pub agent_id: String,
    pub tool_policy: ToolPolicy,
    /// Role → model spec overrides (e.g. `{"executor": "anthropic/claude-opus-4"}`).
    pub models: HashMap<String, String>,
    /// The cancel group this child belongs to, for cascading stop.
    pub cancel_group: Option<String>,
}

#[derive(Clone)]
pub struct AgentRuntime {
    pub id: String,
    pub config: AgentConfig,
}

impl AgentRuntime {
    pub fn context(&self, cancel_group: Option<String>) -> AgentContext {
        AgentContext {
            agent_id: self.id.clone(),
            tool_policy: self.config.tool_policy.clone(),
            models: self.config.models.clone(),
            cancel_group,
        }
    }
}

/// Registry of all configured sub-agent profiles, built once at startup
/// from [`ki_domain::config::Config::agents`].
pub struct AgentManager {
    agents: HashMap<String, Arc<AgentRuntime>>,
}

impl AgentManager {
    /// Built once at startup from the top-level config, before the rest of
    /// `AppState` exists — `AgentManager` only needs the agent profile
    /// table, not the fully-assembled state.
    pub fn from_config(agents: &HashMap<String, AgentConfig>) -> Self {
        let mut built = HashMap::new();

        for (id, cfg) in agents {
            tracing::info!(
                agent_id = id,
                tools_allowed = ?cfg.tool_policy.allow,
                tools_denied = ?cfg.tool_policy.deny,
                models = ?cfg.models,
                "registered sub-agent profile"
            );

            built.insert(
                id.clone(),
                Arc::new(AgentRuntime {
                    id: id.clone(),
                    config: cfg.clone(),
                }),
            );
        }

        Self { agents: built }
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentRuntime>> {
        self.agents.get(agent_id).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Execute a task as a sub-agent and block until the child turn completes.
/// Returns `(result_text, is_error, tokens_used)` — the caller folds
/// `tokens_used` into its own budget/report accounting (§3's
/// `CycleReport.tokens_used`).
pub async fn run_agent(
    state: &AppState,
    agent_id: &str,
    task: &str,
    model_override: Option<String>,
    parent_turn_id: &str,
    tool_defs: Vec<ki_domain::tool::ToolDefinition>,
) -> (String, bool, u64) {
    let manager = match &state.agents {
        Some(m) => m,
        None => return ("no agent manager configured".into(), true, 0),
    };

    let runtime = match manager.get(agent_id) {
        Some(r) => r,
        None => {
            return (
                format!("agent '{agent_id}' not found. Available: {:?}", manager.list()),
                true,
                0,
            );
        }
    };

    let task_id = uuid::Uuid::new_v4().to_string();
    let child_turn_id = format!("agent:{agent_id}:task:{task_id}");

    state.cancel_map.add_to_group(parent_turn_id, &child_turn_id);

    let mut ctx = runtime.context(Some(parent_turn_id.to_string()));
    if let Some(m) = model_override {
        ctx.models.insert("executor".to_string(), m);
    }

    let input = TurnInput {
        turn_id: child_turn_id.clone(),
        role: ki_domain::capability::ModelRole::Executor,
        system_prompt: runtime.config.description.clone(),
        messages: vec![Message::user(task)],
        tool_defs,
        agent: Some(ctx),
    };

    let outcome: TurnOutcome = match run_turn(state, input).await {
        Ok(o) => o,
        Err(e) => {
            state
                .cancel_map
                .remove_from_group(parent_turn_id, &child_turn_id);
            return (format!("agent turn failed: {e}"), true, 0);
        }
    };

    state
        .cancel_map
        .remove_from_group(parent_turn_id, &child_turn_id);

    if outcome.cancelled {
        return ("[agent cancelled]".into(), true, outcome.tokens_used);
    }
    if outcome.content.is_empty() {
        return (
            if outcome.truncated {
                "[agent stopped: budget exhausted before a final answer]".into()
            } else {
                "[agent produced no output]".into()
            },
            true,
            outcome.tokens_used,
        );
    }
    (outcome.content, false, outcome.tokens_used)
}
