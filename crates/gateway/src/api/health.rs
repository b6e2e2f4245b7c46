//! Ambient process-health surface — not one of the named §4.9 operations,
//! but carried the way the teacher's own `admin::health`/`admin::openapi_spec`
//! routes are: unauthenticated, cheap, and safe to hit from a load balancer
//! or a human poking at the API with curl.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.sessions.stats();
    Json(serde_json::json!({
        "status": "ok",
        "clusters": state.cluster_guard.allow_list(),
        "sessions": stats,
    }))
}

pub async fn docs() -> impl IntoResponse {
    Json(serde_json::json!({
        "operations": [
            { "op": "query", "method": "POST", "path": "/v1/query", "auth": "optional" },
            { "op": "session.create", "method": "POST", "path": "/v1/sessions", "auth": "optional" },
            { "op": "session.query", "method": "POST", "path": "/v1/sessions/:id/query", "auth": "required" },
            { "op": "session.get", "method": "GET", "path": "/v1/sessions/:id", "auth": "required" },
            { "op": "session.delete", "method": "DELETE", "path": "/v1/sessions/:id", "auth": "required" },
            { "op": "sessions.stats", "method": "GET", "path": "/v1/sessions/stats", "auth": "required" },
        ]
    }))
}
