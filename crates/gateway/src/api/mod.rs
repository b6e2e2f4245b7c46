pub mod auth;
pub mod error;
pub mod health;
pub mod query;
pub mod rate_limit;
pub mod sessions;

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::state::AppState;

/// Build the full API router: the six named §4.9 operations, plus the
/// ambient `health`/`docs` surface every teacher-style service carries
/// regardless of what the spec's feature list excludes.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/docs", get(health::docs))
        .route("/v1/query", post(query::query))
        .route("/v1/sessions", post(sessions::create_session));

    let protected = Router::new()
        .route("/v1/sessions/stats", get(sessions::stats))
        .route("/v1/sessions/:id/query", post(query::session_query))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/sessions/:id", delete(sessions::delete_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    let cors = cors_layer(&state.config.server.cors.allowed_origins);
    let concurrency = ConcurrencyLimitLayer::new(state.config.server.max_concurrent_requests.max(1));

    public
        .merge(protected)
        .route_layer(middleware::from_fn_with_state(state, rate_limit_middleware))
        .layer(cors)
        .layer(concurrency)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
}

/// Maps a request to the `server.rate_limits` config key that governs it,
/// per §4.9's per-endpoint table. `health`/`docs`, `sessions.stats`, and
/// `session.delete` are deliberately unmapped ("—" in that table) — they
/// pass through with no limiting.
fn route_key(method: &axum::http::Method, path: &str, authenticated: bool) -> Option<&'static str> {
    if path == "/v1/query" {
        Some(if authenticated { "query" } else { "query_unauth" })
    } else if path == "/v1/sessions" {
        Some("session_create")
    } else if path == "/v1/sessions/stats" {
        None
    } else if path.ends_with("/query") {
        Some("session_query")
    } else if path.starts_with("/v1/sessions/") && *method == axum::http::Method::GET {
        Some("session_get")
    } else {
        None
    }
}

async fn rate_limit_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let authenticated = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.is_empty());
    let key = match route_key(req.method(), &path, authenticated) {
        Some(k) => k,
        None => return next.run(req).await,
    };

    let limit = match state.config.server.rate_limits.get(key) {
        Some(l) => *l,
        None => return next.run(req).await,
    };

    let identity = auth::identity_of(&req, &addr.ip().to_string());
    let decision = state.rate_limiter.check(key, &identity, &limit);

    if !decision.allowed {
        let retry_after = decision.retry_after.max(Duration::from_secs(1)).as_secs();
        let mut resp = error::rate_limited(format!("retry after {retry_after}s"));
        resp.headers_mut().insert(
            axum::http::header::RETRY_AFTER,
            retry_after.to_string().parse().expect("digit string is a valid header value"),
        );
        return resp;
    }

    next.run(req).await
}
