use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// API keys accepted on `X-API-Key`. Empty list = dev mode (no auth).
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Max in-flight requests before the concurrency-limit layer sheds load.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Per-(route, identity) token bucket limits, keyed by route name.
    #[serde(default = "d_rate_limits")]
    pub rate_limits: HashMap<String, RouteRateLimit>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            api_keys: Vec::new(),
            max_concurrent_requests: d_max_concurrent(),
            rate_limits: d_rate_limits(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

/// Token-bucket limit for one HTTP route, enforced per identity (API key,
/// or client IP in dev mode).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteRateLimit {
    pub requests_per_minute: u32,
    pub burst: u32,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    3210
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
fn d_max_concurrent() -> usize {
    256
}
fn d_rate_limits() -> HashMap<String, RouteRateLimit> {
    let mut m = HashMap::new();
    // §4.9's table: 60/min authenticated, 10/min unauthenticated for `query`.
    m.insert(
        "query".into(),
        RouteRateLimit { requests_per_minute: 60, burst: 10 },
    );
    m.insert(
        "query_unauth".into(),
        RouteRateLimit { requests_per_minute: 10, burst: 3 },
    );
    m.insert(
        "session_create".into(),
        RouteRateLimit { requests_per_minute: 10, burst: 3 },
    );
    m.insert(
        "session_query".into(),
        RouteRateLimit { requests_per_minute: 60, burst: 10 },
    );
    m.insert(
        "session_get".into(),
        RouteRateLimit { requests_per_minute: 30, burst: 5 },
    );
    // `session.delete` and `sessions.stats` carry no configured limit
    // (spec §4.9 marks both "—") — intentionally absent from this map.
    m
}
