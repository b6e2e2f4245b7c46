//! The LLM Driver — runs one bounded "advance" of a conversation: call the
//! model, dispatch any tool calls it requests through the Safety Hook
//! Chain, feed the results back, and repeat until the model stops asking
//! for tools or the turn's [`ki_domain::config::BudgetConfig`] is
//! exhausted (§4.3, §5).
//!
//! Read-category tool calls in a single model turn are dispatched
//! concurrently, bounded by `max_concurrent_reads`; Write and Destructive
//! calls are dispatched one at a time, in the order the model requested
//! them, so a later call can observe an earlier one's side effect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;

use ki_domain::capability::ModelRole;
use ki_domain::config::BudgetConfig;
use ki_domain::error::Result;
use ki_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolCategory, ToolDefinition};
use ki_providers::router::resolve_model;
use ki_providers::traits::{ChatRequest, ChatResponse};

use crate::state::AppState;

use super::agent::AgentContext;
use super::cancel::CancelToken;
use super::safety::SafetyContext;

/// Hard ceiling on model round-trips in a single turn, independent of the
/// tool-call budget — guards against a model that keeps replying with
/// empty, tool-free text in a loop.
const MAX_MODEL_ROUNDS: usize = 25;

pub struct TurnInput {
    /// Identifies the caller for cancellation, the audit trail, and the
    /// Safety Hook Chain: an HTTP session id, an `agent:<id>:task:<uuid>`
    /// delegation key, or the orchestrator's cycle id.
    pub turn_id: String,
    pub role: ModelRole,
    pub system_prompt: String,
    /// Prior history plus the new user turn, already assembled by the
    /// caller — the HTTP query path reads this from a [`ki_sessions::Session`],
    /// the orchestrator assembles it fresh each cycle.
    pub messages: Vec<Message>,
    pub tool_defs: Vec<ToolDefinition>,
    pub agent: Option<AgentContext>,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub content: String,
    pub tool_calls_made: Vec<String>,
    pub tokens_used: u64,
    pub duration_ms: u64,
    /// Set when the turn stopped because it hit `max_tool_calls`,
    /// `max_tokens_per_advance`, or `wall_clock_deadline_secs` before the
    /// model produced a final answer — §4.3's bounded-advance contract.
    pub truncated: bool,
    pub cancelled: bool,
}

/// Run one bounded advance and return the outcome. Registers a
/// [`CancelToken`] under `input.turn_id` for the duration of the call and
/// removes it on return, so `state.cancel_map.cancel(turn_id)` reaches a
/// turn in progress.
pub async fn run_turn(state: &AppState, input: TurnInput) -> Result<TurnOutcome> {
    let budget = state.config.orchestrator.budget.clone();
    let deadline = Instant::now() + Duration::from_secs(budget.wall_clock_deadline_secs);
    let turn_id = input.turn_id.clone();
    let cancel = state.cancel_map.register(&turn_id);

    let result = run_turn_inner(state, input, &budget, deadline, &cancel).await;
    state.cancel_map.remove(&turn_id);
    result
}

async fn run_turn_inner(
    state: &AppState,
    input: TurnInput,
    budget: &BudgetConfig,
    deadline: Instant,
    cancel: &CancelToken,
) -> Result<TurnOutcome> {
    let start = Instant::now();
    let mut messages = input.messages;
    messages.insert(0, Message::system(&input.system_prompt));

    let tool_defs = filter_tool_defs(&input.tool_defs, input.agent.as_ref());
    let model_override = input
        .agent
        .as_ref()
        .and_then(|a| a.models.get(role_key(input.role)).cloned());

    let mut tool_calls_made = Vec::new();
    let mut total_tokens: u64 = 0;

    for round in 0..MAX_MODEL_ROUNDS {
        if cancel.is_cancelled() {
            return Ok(finish(String::new(), tool_calls_made, total_tokens, start, false, true));
        }
        if Instant::now() >= deadline
            || tool_calls_made.len() as u32 >= budget.max_tool_calls
            || total_tokens >= budget.max_tokens_per_advance as u64
        {
            return Ok(finish(String::new(), tool_calls_made, total_tokens, start, true, false));
        }

        let req = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: Some(0.2),
            max_tokens: None,
            json_mode: false,
            model: None,
        };

        let resp = call_model(state, input.role, model_override.as_deref(), req).await?;
        if let Some(u) = &resp.usage {
            total_tokens += u.total_tokens as u64;
        }

        if resp.tool_calls.is_empty() {
            return Ok(finish(resp.content, tool_calls_made, total_tokens, start, false, false));
        }

        messages.push(assistant_tool_message(&resp.content, &resp.tool_calls));

        let remaining = budget.max_tool_calls.saturating_sub(tool_calls_made.len() as u32).max(1);
        let truncated_batch = resp.tool_calls.len() as u32 > remaining;
        let calls: Vec<ToolCall> = resp.tool_calls.into_iter().take(remaining as usize).collect();

        let (reads, writes): (Vec<ToolCall>, Vec<ToolCall>) = calls.into_iter().partition(|tc| {
            state
                .catalog
                .category_of(&tc.tool_name)
                .map(ToolCategory::may_run_concurrently)
                .unwrap_or(false)
        });

        // Reads run concurrently, bounded by max_concurrent_reads.
        let semaphore = Arc::new(Semaphore::new(budget.max_concurrent_reads.max(1)));
        let read_futures: Vec<_> = reads
            .iter()
            .map(|tc| {
                let sem = semaphore.clone();
                async move {
                    let _permit = sem.acquire().await.expect("semaphore never closed");
                    dispatch_one(state, &input.turn_id, tc, input.agent.as_ref(), &tool_defs).await
                }
            })
            .collect();
        let read_results = join_all(read_futures).await;
        for (tc, (content, _is_error)) in reads.iter().zip(read_results) {
            tool_calls_made.push(tc.tool_name.clone());
            messages.push(Message::tool_result(&tc.call_id, &content));
        }

        // Writes/Destructive run serially, in request order.
        for tc in &writes {
            if cancel.is_cancelled() {
                return Ok(finish(String::new(), tool_calls_made, total_tokens, start, false, true));
            }
            let (content, _is_error) =
                dispatch_one(state, &input.turn_id, tc, input.agent.as_ref(), &tool_defs).await;
            tool_calls_made.push(tc.tool_name.clone());
            messages.push(Message::tool_result(&tc.call_id, &content));
        }

        if truncated_batch || round == MAX_MODEL_ROUNDS - 1 {
            return Ok(finish(String::new(), tool_calls_made, total_tokens, start, true, false));
        }
    }

    Ok(finish(String::new(), tool_calls_made, total_tokens, start, true, false))
}

fn finish(
    content: String,
    tool_calls_made: Vec<String>,
    tokens_used: u64,
    start: Instant,
    truncated: bool,
    cancelled: bool,
) -> TurnOutcome {
    TurnOutcome {
        content,
        tool_calls_made,
        tokens_used,
        duration_ms: start.elapsed().as_millis() as u64,
        truncated,
        cancelled,
    }
}

fn role_key(role: ModelRole) -> &'static str {
    match role {
        ModelRole::Planner => "planner",
        ModelRole::Executor => "executor",
        ModelRole::Summarizer => "summarizer",
    }
}

/// Agent-level model overrides bypass `LlmRouter::chat_for_role`'s
/// role-config lookup entirely — the router always resolves its own
/// model for a role, so honoring an override means going straight to the
/// named provider instead.
async fn call_model(
    state: &AppState,
    role: ModelRole,
    model_override: Option<&str>,
    req: ChatRequest,
) -> Result<ChatResponse> {
    if let Some(model_str) = model_override {
        let (provider_id, model_name) = resolve_model(model_str);
        if let Some(provider) = state.llm.registry().get(provider_id) {
            let mut req = req;
            req.model = Some(model_name.to_string());
            return provider.chat(req).await;
        }
        tracing::warn!(
            provider_id,
            "agent model override names an unknown provider, falling back to role default"
        );
    }
    state.llm.chat_for_role(role, req).await
}

fn filter_tool_defs(defs: &[ToolDefinition], agent: Option<&AgentContext>) -> Vec<ToolDefinition> {
    match agent {
        Some(ctx) => defs
            .iter()
            .filter(|d| ctx.tool_policy.allows(&d.name))
            .cloned()
            .collect(),
        None => defs.to_vec(),
    }
}

/// Step 5 of the session pruner, part one: build the summarizer prompt from
/// a session's oldest pinned (non-system) turns. `None` if there is nothing
/// pinned to summarize. Pure — takes no lock itself, so callers build this
/// while holding a session lock only briefly.
pub fn summary_prompt(session: &ki_sessions::Session) -> Option<String> {
    let pinned_text: Vec<String> = session
        .flags
        .pinned_indices
        .iter()
        .filter(|&&idx| idx != 0)
        .filter_map(|&idx| session.messages.get(idx))
        .map(|m| format!("{:?}: {}", m.role, m.content.extract_all_text()))
        .collect();

    if pinned_text.is_empty() {
        return None;
    }

    Some(format!(
        "Summarize the following conversation turns in one short paragraph, \
        preserving any cluster/namespace/workload names, severities, and \
        outcomes a reader would need later:\n\n{}",
        pinned_text.join("\n")
    ))
}

/// Step 5 of the session pruner, part two: run the summarizer role over a
/// prompt built by [`summary_prompt`]. Returns `None` (leaving the session
/// over budget, to be retried next cycle) if the model call fails.
pub async fn run_summarizer(state: &AppState, turn_id: &str, prompt: String) -> Option<String> {
    let req = ChatRequest {
        messages: vec![Message::user(prompt)],
        tools: Vec::new(),
        temperature: Some(0.2),
        max_tokens: None,
        json_mode: false,
        model: None,
    };

    match call_model(state, ModelRole::Summarizer, None, req).await {
        Ok(resp) => Some(resp.content),
        Err(e) => {
            tracing::warn!(turn_id, error = %e, "summarizer role failed, leaving session over budget");
            None
        }
    }
}

fn assistant_tool_message(text: &str, calls: &[ToolCall]) -> Message {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.to_string() });
    }
    for tc in calls {
        parts.push(ContentPart::ToolUse {
            id: tc.call_id.clone(),
            name: tc.tool_name.clone(),
            input: tc.arguments.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(parts),
    }
}

/// Run a single tool call through the Safety Hook Chain, then — only if
/// allowed — the tool catalog. Returns `(content, is_error)`.
async fn dispatch_one(
    state: &AppState,
    turn_id: &str,
    tc: &ToolCall,
    agent: Option<&AgentContext>,
    tool_defs: &[ToolDefinition],
) -> (String, bool) {
    if let Some(ctx) = agent {
        if !ctx.tool_policy.allows(&tc.tool_name) {
            return (
                format!("tool '{}' is not permitted for this agent profile", tc.tool_name),
                true,
            );
        }
    }

    match tc.tool_name.as_str() {
        "agent.run" => {
            return super::tools::dispatch_agent_run(state, &tc.arguments, turn_id, tool_defs.to_vec()).await
        }
        "agent.list" => return super::tools::dispatch_agent_list(state),
        _ => {}
    }

    let category = state
        .catalog
        .category_of(&tc.tool_name)
        .unwrap_or(ToolCategory::Read);
    let mut safety_ctx = safety_context_from_args(&tc.arguments);
    if category == ToolCategory::Destructive {
        safety_ctx.current_replicas = state.catalog.current_replicas(&tc.tool_name, &tc.arguments).await;
    }

    let verdict = state
        .safety
        .check(turn_id, &tc.tool_name, category, &tc.arguments, &safety_ctx)
        .await;

    if !verdict.is_allowed() {
        return (
            format!(
                "denied by safety policy: {}",
                verdict.reason.unwrap_or_else(|| "no reason given".into())
            ),
            true,
        );
    }

    let outcome = state
        .catalog
        .invoke(&tc.call_id, &tc.tool_name, tc.arguments.clone())
        .await;
    (outcome.content, outcome.is_error)
}

fn safety_context_from_args(arguments: &Value) -> SafetyContext {
    SafetyContext {
        cluster: arguments.get("cluster").and_then(|v| v.as_str()).map(String::from),
        namespace: arguments.get("namespace").and_then(|v| v.as_str()).map(String::from),
        current_replicas: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_tool_message_includes_text_and_calls() {
        let calls = vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "list_pods".into(),
            arguments: serde_json::json!({}),
        }];
        let msg = assistant_tool_message("thinking", &calls);
        match msg.content {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 2),
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn safety_context_extracts_cluster_and_namespace() {
        let args = serde_json::json!({"cluster": "dev-eks", "namespace": "app"});
        let ctx = safety_context_from_args(&args);
        assert_eq!(ctx.cluster.as_deref(), Some("dev-eks"));
        assert_eq!(ctx.namespace.as_deref(), Some("app"));
        assert!(ctx.current_replicas.is_none());
    }

    #[test]
    fn role_key_matches_llm_config_role_names() {
        assert_eq!(role_key(ModelRole::Planner), "planner");
        assert_eq!(role_key(ModelRole::Executor), "executor");
        assert_eq!(role_key(ModelRole::Summarizer), "summarizer");
    }
}
