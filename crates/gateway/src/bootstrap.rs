//! `AppState` construction and background-task spawning, extracted from
//! `main.rs` so both `serve` and `doctor` share one boot path.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use ki_catalog::{
    aws::AwsAdapter, datadog::DatadogAdapter, github::GithubAdapter, jira::JiraAdapter,
    k8s::K8sAdapter, teams::TeamsAdapter, ToolAdapter, ToolCatalog,
};
use ki_domain::cluster_guard::ClusterGuard;
use ki_domain::config::{Config, ConfigSeverity};
use ki_providers::router::LlmRouter;
use ki_sessions::SessionStore;

use crate::api::auth::hash_api_key;
use crate::api::rate_limit::RateLimiter;
use crate::runtime::agent::AgentManager;
use crate::runtime::audit::AuditLog;
use crate::runtime::cancel::CancelMap;
use crate::runtime::notifier::Notifier;
use crate::runtime::orchestrator::{self, OrchestratorMemory};
use crate::runtime::safety::SafetyChain;
use crate::runtime::session_lock::SessionLockMap;
use crate::state::AppState;

/// Validate config, wire up every subsystem, and return a fully-built
/// [`AppState`]. Any failure here is fatal at boot — we exit before an
/// HTTP listener opens or an LLM call is ever made (§8 scenario 6).
pub async fn build_app_state(config: Config) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let config = Arc::new(config);

    // ── Cluster Guard ────────────────────────────────────────────────
    if config.cluster.allow_list.is_empty() {
        anyhow::bail!("cluster.allow_list is empty — refusing to boot with no reachable cluster");
    }
    let cluster_guard = ClusterGuard::new(config.cluster.allow_list.clone());
    tracing::info!(clusters = ?cluster_guard.allow_list(), "cluster guard ready");

    // ── Tool Catalog ─────────────────────────────────────────────────
    // Adapter registration order matters: the GitHub and Jira adapters
    // both contribute a tool named `create_issue`, and the catalog's
    // "last adapter wins" dedup means Jira must be registered after
    // GitHub so the Ticket Correlator's `create_issue` call resolves to
    // Jira's shape (`summary`/`description`) rather than GitHub's
    // (`title`/`body`).
    let mut adapters: Vec<Box<dyn ToolAdapter>> = vec![Box::new(K8sAdapter::new(config.cluster.allow_list.clone()))];

    if let Some(gh) = &config.notify.github {
        let token = read_secret_env(&gh.api_token_env).unwrap_or_default();
        adapters.push(Box::new(GithubAdapter::new(
            token,
            gh.default_owner.clone(),
            gh.default_repo.clone(),
        )));
        tracing::info!("GitHub adapter registered");
    }

    if !config.cluster.nat_gateway_map.is_empty() {
        adapters.push(Box::new(AwsAdapter::new().await));
        tracing::info!("AWS adapter registered");
    }

    if let Some(dd) = &config.notify.datadog {
        let api_key = read_secret_env(&dd.api_key_env).unwrap_or_default();
        let app_key = read_secret_env(&dd.app_key_env).unwrap_or_default();
        adapters.push(Box::new(DatadogAdapter::new(dd.site.clone(), api_key, app_key)));
        tracing::info!("Datadog adapter registered");
    }

    if let Some(teams) = &config.notify.teams {
        let webhook = read_secret_env(&teams.webhook_url_env).unwrap_or_default();
        adapters.push(Box::new(TeamsAdapter::new(webhook)));
        tracing::info!("Teams adapter registered");
    }

    // Jira last — see the ordering note above.
    if let Some(jira) = &config.notify.jira {
        let token = read_secret_env(&jira.api_token_env).unwrap_or_default();
        adapters.push(Box::new(JiraAdapter::new(
            jira.base_url.clone(),
            jira.project_key.clone(),
            jira.email.clone(),
            token,
        )));
        tracing::info!("Jira adapter registered");
    }

    let catalog = Arc::new(ToolCatalog::new(adapters));
    tracing::info!(tools = catalog.descriptors().len(), "tool catalog ready");

    // ── Audit + Notifier + Safety Hook Chain ────────────────────────
    let audit = Arc::new(AuditLog::new(&config.safety.audit_dir).context("initializing audit log")?);
    let notifier = Arc::new(Notifier::new(config.safety.notify_dedup_minutes));
    let safety = Arc::new(SafetyChain::new(
        audit.clone(),
        notifier.clone(),
        cluster_guard.clone(),
        &config.cluster,
        &config.safety,
    ));
    tracing::info!("safety hook chain ready");

    // ── LLM Driver ───────────────────────────────────────────────────
    let llm = Arc::new(LlmRouter::from_config(&config.llm).context("initializing LLM router")?);
    tracing::info!(providers = llm.registry().len(), "LLM router ready");

    // ── Session Store ────────────────────────────────────────────────
    let sessions = Arc::new(
        SessionStore::new(Path::new(&config.sessions.state_dir), config.sessions.clone())
            .context("initializing session store")?,
    );
    tracing::info!(state_dir = %config.sessions.state_dir, "session store ready");

    // ── Subagent registry ────────────────────────────────────────────
    let agents = if config.agents.is_empty() {
        None
    } else {
        let manager = AgentManager::from_config(&config.agents);
        tracing::info!(agent_count = manager.len(), "sub-agent registry ready");
        Some(Arc::new(manager))
    };

    // ── API keys (hashed once at startup) ───────────────────────────
    let api_key_hashes: Arc<Vec<[u8; 32]>> = Arc::new(config.server.api_keys.iter().map(|k| hash_api_key(k)).collect());
    if api_key_hashes.is_empty() {
        tracing::warn!("server.api_keys is empty — API auth DISABLED (dev mode)");
    } else {
        tracing::info!(key_count = api_key_hashes.len(), "API key auth enabled");
    }

    Ok(AppState {
        config,
        llm,
        catalog,
        sessions,
        safety,
        cluster_guard,
        agents,
        cancel_map: Arc::new(CancelMap::new()),
        session_locks: Arc::new(SessionLockMap::new()),
        audit,
        notifier,
        orchestrator_memory: Arc::new(OrchestratorMemory::new()),
        rate_limiter: Arc::new(RateLimiter::new()),
        api_key_hashes,
    })
}

fn read_secret_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// Spawn the two long-running background loops: the session TTL sweeper
/// and the Monitoring Orchestrator's cycle scheduler. Call after
/// [`build_app_state`], only for the `serve` command — `doctor` and
/// `config` boot a state just to inspect it and never start these.
pub fn spawn_background_tasks(state: Arc<AppState>) {
    {
        let state = state.clone();
        let interval_secs = state.config.sessions.sweep_interval_seconds.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let evicted = state.sessions.sweep_expired();
                if evicted > 0 {
                    tracing::info!(evicted, "swept TTL-expired sessions");
                }
            }
        });
    }

    {
        let state = state.clone();
        let interval_secs = state.config.orchestrator.cycle_interval_seconds.max(1);
        let busy = Arc::new(std::sync::atomic::AtomicBool::new(false));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                if busy.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    tracing::warn!("skipping monitoring tick: previous cycle still running");
                    continue;
                }
                let state = state.clone();
                let busy = busy.clone();
                tokio::spawn(async move {
                    orchestrator::run_tick(&state).await;
                    busy.store(false, std::sync::atomic::Ordering::SeqCst);
                });
            }
        });
    }

    tracing::info!("background tasks spawned");
}
