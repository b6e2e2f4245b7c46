//! Shared process state — the one `Arc<AppState>` cloned into every HTTP
//! handler, monitoring cycle, and sub-agent turn (§3, §4).
//!
//! Built once in `bootstrap::build_app_state` and never mutated at the
//! struct level afterward; interior mutability lives in the individual
//! components (`SessionStore`, `CancelMap`, `Notifier`, ...) the way the
//! teacher's own state holds its stores.

use std::sync::Arc;

use ki_catalog::ToolCatalog;
use ki_domain::cluster_guard::ClusterGuard;
use ki_domain::config::Config;
use ki_providers::router::LlmRouter;
use ki_sessions::SessionStore;

use crate::api::rate_limit::RateLimiter;
use crate::runtime::agent::AgentManager;
use crate::runtime::audit::AuditLog;
use crate::runtime::cancel::CancelMap;
use crate::runtime::notifier::Notifier;
use crate::runtime::orchestrator::OrchestratorMemory;
use crate::runtime::safety::SafetyChain;
use crate::runtime::session_lock::SessionLockMap;

/// Everything a request, a sub-agent turn, or a monitoring cycle needs to
/// do its job. Cheap to clone — every field is an `Arc` or a small value
/// type.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<LlmRouter>,
    pub catalog: Arc<ToolCatalog>,
    pub sessions: Arc<SessionStore>,
    pub safety: Arc<SafetyChain>,
    pub cluster_guard: ClusterGuard,
    pub agents: Option<Arc<AgentManager>>,
    pub cancel_map: Arc<CancelMap>,
    pub session_locks: Arc<SessionLockMap>,
    pub audit: Arc<AuditLog>,
    pub notifier: Arc<Notifier>,
    pub orchestrator_memory: Arc<OrchestratorMemory>,
    pub rate_limiter: Arc<RateLimiter>,
    /// SHA-256 digests of every configured `server.api_keys` entry.
    /// Empty means auth is disabled (local/dev mode) — every request is
    /// treated as authenticated.
    pub api_key_hashes: Arc<Vec<[u8; 32]>>,
}

impl AppState {
    pub fn auth_required(&self) -> bool {
        !self.api_key_hashes.is_empty()
    }
}
