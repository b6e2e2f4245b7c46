//! `session.create`, `session.get`, `session.delete`, and `sessions.stats`
//! handlers (§4.9).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Serialize;

use super::error;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// `POST /v1/sessions` — open a new TTL-bound query session.
pub async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let handle = state.sessions.create_query_session();
    let id = handle.lock().id.clone();
    Json(CreateSessionResponse { session_id: id })
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_used_at: chrono::DateTime<chrono::Utc>,
    pub token_estimate: u64,
    pub max_tokens: u64,
    pub ttl_minutes: Option<i64>,
    pub message_count: usize,
    pub history: Vec<MessageView>,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub role: String,
    pub text: String,
}

/// `GET /v1/sessions/:id` — session metadata plus its message history.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let handle = match state.sessions.get(&id) {
        Some(h) => h,
        None => return error::not_found("session not found"),
    };

    let session = handle.lock();
    let history = session
        .messages
        .iter()
        .map(|m| MessageView {
            role: format!("{:?}", m.role).to_ascii_lowercase(),
            text: m.content.extract_all_text(),
        })
        .collect();

    Json(SessionView {
        session_id: session.id.clone(),
        created_at: session.created_at,
        last_used_at: session.last_used_at,
        token_estimate: session.token_estimate,
        max_tokens: session.max_tokens,
        ttl_minutes: session.ttl_minutes,
        message_count: session.messages.len(),
        history,
    })
    .into_response()
}

/// `DELETE /v1/sessions/:id` — destroy a session.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.sessions.delete(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// `GET /v1/sessions/stats` — counts and evictions.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.stats())
}
