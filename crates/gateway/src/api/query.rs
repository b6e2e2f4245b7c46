//! `query` and `session.query` handlers — the two request-answering
//! operations of the Query/Session HTTP Engine (§4.9).
//!
//! Both bind (or skip) a session, append the user turn, invoke the LLM
//! Driver with the full tool catalog, and return the terminal assistant
//! text alongside a compact summary of what the turn did.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use ki_domain::capability::ModelRole;
use ki_domain::tool::Message;
use ki_sessions::prune_structural;

use super::error;
use crate::runtime::{run_summarizer, run_turn, summary_prompt, TurnInput};
use crate::runtime::tools::build_tool_definitions;
use crate::state::AppState;

const SYSTEM_PROMPT: &str = "You are the on-call assistant for a Kubernetes incident triage and \
    remediation platform. Answer from the tools available to you — list pods, read logs and \
    events, check recent deploys and tickets — rather than guessing. State what you found and \
    what, if anything, you changed.";

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Serialize)]
pub struct ResponseMetadata {
    pub tools_invoked: Vec<String>,
    pub tokens_used: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

fn prompt_with_context(prompt: &str, context: &Option<serde_json::Value>) -> String {
    match context {
        Some(ctx) if !ctx.is_null() => format!("{prompt}\n\nAdditional context:\n{ctx}"),
        _ => prompt.to_string(),
    }
}

/// Reject at ingress, before any LLM call, a request naming a cluster
/// context other than the allow-listed one (§4.9's "Cluster guard hook").
/// `context.cluster` is the only place a caller can name a cluster on this
/// surface; requests that don't name one are unaffected.
fn reject_disallowed_cluster(state: &AppState, context: &Option<serde_json::Value>) -> Option<axum::response::Response> {
    let cluster = context
        .as_ref()
        .and_then(|c| c.get("cluster"))
        .and_then(|v| v.as_str())?;
    if state.cluster_guard.is_allowed(cluster) {
        None
    } else {
        Some(error::validation(format!(
            "cluster '{cluster}' is not in the allow-list"
        )))
    }
}

/// `POST /v1/query` — single-shot: no session is created or persisted.
pub async fn query(State(state): State<AppState>, Json(body): Json<QueryBody>) -> axum::response::Response {
    if body.prompt.trim().is_empty() {
        return error::validation("prompt must not be empty");
    }
    if let Some(rejection) = reject_disallowed_cluster(&state, &body.context) {
        return rejection;
    }

    let turn_id = format!("query:{}", uuid::Uuid::new_v4());
    let messages = vec![Message::user(prompt_with_context(&body.prompt, &body.context))];
    let tool_defs = build_tool_definitions(&state, None);

    run_and_respond(&state, turn_id, messages, tool_defs, None).await
}

/// `POST /v1/sessions/:id/query` — append to an existing session's history.
pub async fn session_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<QueryBody>,
) -> axum::response::Response {
    if body.prompt.trim().is_empty() {
        return error::validation("prompt must not be empty");
    }
    if let Some(rejection) = reject_disallowed_cluster(&state, &body.context) {
        return rejection;
    }

    let handle = match state.sessions.get(&id) {
        Some(h) => h,
        None => return error::not_found("session not found"),
    };

    // Held for the full duration of this handler so a second request
    // against the same session can't interleave its turn with this one.
    let _lock = match state.session_locks.acquire(&id).await {
        Ok(permit) => permit,
        Err(_) => return error::busy("a turn is already in progress for this session"),
    };

    let user_text = prompt_with_context(&body.prompt, &body.context);
    let messages = {
        let mut session = handle.lock();
        session.push(Message::user(&user_text));
        session.messages.clone()
    };

    let turn_id = format!("session:{id}");
    let tool_defs = build_tool_definitions(&state, None);
    let resp = run_and_respond(&state, turn_id, messages, tool_defs, Some(id.clone())).await;

    if resp.status() == StatusCode::OK {
        let trigger_ratio = state.sessions.prune_trigger_ratio();
        let prompt = {
            let mut session = handle.lock();
            let needs_summary = session.needs_pruning(trigger_ratio)
                && prune_structural(&mut session, trigger_ratio).needs_summary;
            needs_summary.then(|| summary_prompt(&session)).flatten()
        };

        if let Some(prompt) = prompt {
            if let Some(summary) = run_summarizer(&state, &id, prompt).await {
                handle.lock().summarize_and_unpin(summary);
            }
        }
    }

    resp
}

async fn run_and_respond(
    state: &AppState,
    turn_id: String,
    messages: Vec<Message>,
    tool_defs: Vec<ki_domain::tool::ToolDefinition>,
    session_id: Option<String>,
) -> axum::response::Response {
    let start = Instant::now();
    let input = TurnInput {
        turn_id,
        role: ModelRole::Planner,
        system_prompt: SYSTEM_PROMPT.to_string(),
        messages,
        tool_defs,
        agent: None,
    };

    let outcome = match run_turn(state, input).await {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "query turn failed");
            return error::internal(e.to_string());
        }
    };

    if outcome.cancelled {
        return error::timeout("turn was cancelled by its wall-clock deadline");
    }

    if let Some(id) = &session_id {
        if let Some(handle) = state.sessions.get(id) {
            let mut session = handle.lock();
            session.push(Message::assistant(outcome.content.clone()));
        }
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    Json(QueryResponse {
        response: outcome.content,
        session_id,
        metadata: ResponseMetadata {
            tools_invoked: outcome.tool_calls_made,
            tokens_used: outcome.tokens_used,
            duration_ms,
            truncated: outcome.truncated.then_some(true),
        },
    })
    .into_response()
}
