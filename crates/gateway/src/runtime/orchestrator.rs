//! The Monitoring Orchestrator — the recurring cycle that watches every
//! allow-listed cluster, asks a diagnostics subagent what's unhealthy,
//! correlates each finding against recent deploys and tracked tickets, and
//! decides whether to notify, file/update a ticket, or auto-remediate
//! (§3, §4.6).
//!
//! [`run_tick`] walks every cluster in
//! [`ki_domain::config::ClusterConfig::allow_list`] and writes one
//! [`CycleReport`] per cluster. Cycles never overlap — the background
//! scheduler in `bootstrap` skips a tick rather than queuing one on top of
//! a cycle still in progress. A cluster that hits its wall-clock budget
//! mid-cycle still gets a report written, with `partial: true`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use ki_domain::config::cluster::{ServiceMapping, ServiceTier};
use ki_domain::cycle::{CycleAction, CycleActionKind, CycleReport};
use ki_domain::finding::{
    CorrelatedDeployment, CorrelatedTraffic, Finding, Severity, TicketMetricsSnapshot,
    TicketReference, Tracker,
};
use ki_domain::tool::ToolCategory;

use crate::state::AppState;

use super::agent::run_agent;
use super::findings::{
    approved_for_auto_remediation, downtime_condition, escalation_severity, parse_findings,
    RemediationContext,
};
use super::safety::SafetyContext;
use super::ticket_correlator::{
    format_comment, gate_inputs_from_history, priority_for, search_query, should_comment,
    snapshot_for,
};
use super::tools::build_tool_definitions;

/// Cross-cycle idempotence memory: the remediation tool applied to each
/// finding fingerprint in the previous cycle, so the auto-remediation gate
/// can refuse to repeat the same action every tick (§4.6's idempotence
/// condition).
pub struct OrchestratorMemory {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    previous_cycle: HashMap<String, String>,
    current_cycle: HashMap<String, String>,
}

impl Default for OrchestratorMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorMemory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    fn was_applied_last_cycle(&self, fingerprint: &str, tool: &str) -> bool {
        self.inner
            .lock()
            .previous_cycle
            .get(fingerprint)
            .map(|t| t == tool)
            .unwrap_or(false)
    }

    fn record_applied(&self, fingerprint: String, tool: String) {
        self.inner.lock().current_cycle.insert(fingerprint, tool);
    }

    /// Roll the cycle just finished into "last cycle" for the next tick.
    fn rotate(&self) {
        let mut inner = self.inner.lock();
        inner.previous_cycle = std::mem::take(&mut inner.current_cycle);
    }
}

/// Run one full tick: one [`CycleReport`] per allow-listed cluster, written
/// to `config.orchestrator.reports_dir`. A failure diagnosing one cluster
/// never stops the others.
pub async fn run_tick(state: &Arc<AppState>) {
    let clusters = state.config.cluster.allow_list.clone();
    for cluster in clusters {
        let report = run_cycle(state, &cluster).await;
        if let Err(e) = write_cycle_report(state, &report) {
            tracing::error!(cluster = %cluster, error = %e, "failed to write cycle report");
        }
    }
    state.orchestrator_memory.rotate();
    prune_orchestrator_session(state).await;
}

/// Run the session pruner (all five steps) against the persistent
/// orchestrator session. Without this, pinned CRITICAL findings
/// (`pin_critical_findings`) would accumulate forever — the orchestrator
/// session has no TTL and runs every tick, never through the HTTP
/// `session.query` path that prunes query sessions.
async fn prune_orchestrator_session(state: &Arc<AppState>) {
    let trigger_ratio = state.sessions.prune_trigger_ratio();
    let session = state.sessions.orchestrator_session();

    let prompt = {
        let mut guard = session.lock();
        if !guard.needs_pruning(trigger_ratio) {
            return;
        }
        let outcome = ki_sessions::prune_structural(&mut guard, trigger_ratio);
        if !outcome.needs_summary {
            drop(guard);
            if let Err(e) = state.sessions.persist_orchestrator_session() {
                tracing::warn!(error = %e, "failed to persist orchestrator session");
            }
            return;
        }
        super::turn::summary_prompt(&guard)
    };

    if let Some(prompt) = prompt {
        if let Some(summary) = super::turn::run_summarizer(state, "orchestrator", prompt).await {
            session.lock().summarize_and_unpin(summary);
        }
    }

    if let Err(e) = state.sessions.persist_orchestrator_session() {
        tracing::warn!(error = %e, "failed to persist orchestrator session");
    }
}

fn write_cycle_report(state: &AppState, report: &CycleReport) -> std::io::Result<()> {
    let dir = std::path::Path::new(&state.config.orchestrator.reports_dir);
    std::fs::create_dir_all(dir)?;
    let final_path = dir.join(report.file_name());
    let tmp_path = dir.join(format!("{}.tmp", report.file_name()));
    let body = serde_json::to_string_pretty(report)
        .unwrap_or_else(|_| "{\"error\":\"cycle report serialization failed\"}".to_string());
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, &final_path)
}

async fn run_cycle(state: &Arc<AppState>, cluster: &str) -> CycleReport {
    let cycle_id = format!("cycle:{}:{}", cluster, uuid::Uuid::new_v4());
    let mut report = CycleReport::started(cycle_id.clone(), cluster.to_string());
    let deadline = Instant::now()
        + std::time::Duration::from_secs(state.config.orchestrator.budget.wall_clock_deadline_secs);
    let tool_defs = build_tool_definitions(state, None);

    let (raw, failed, tokens) = run_agent(
        state,
        "diagnostics",
        &diagnostics_task(cluster),
        None,
        &cycle_id,
        tool_defs.clone(),
    )
    .await;
    report.tokens_used += tokens;
    if failed {
        report.actions_taken.push(CycleAction {
            finding_fingerprint: cluster.to_string(),
            kind: CycleActionKind::Error,
            ticket_key: None,
            reason: Some(format!("diagnostics delegation failed: {raw}")),
        });
        return finish(report, false);
    }

    let mut findings = match parse_findings(&raw) {
        Ok(f) => f,
        Err(e) => {
            report.actions_taken.push(CycleAction {
                finding_fingerprint: cluster.to_string(),
                kind: CycleActionKind::Error,
                ticket_key: None,
                reason: Some(format!("could not parse diagnostics report: {e}")),
            });
            return finish(report, false);
        }
    };

    for finding in &mut findings {
        classify_severity(state, finding);
    }

    for finding in &mut findings {
        if Instant::now() >= deadline {
            report.findings = findings;
            return finish(report, true);
        }
        if finding.kind.requires_log_evidence() {
            report.tokens_used += gather_log_evidence(state, &cycle_id, finding, tool_defs.clone()).await;
        }
        correlate_deployment(state, &cycle_id, finding).await;
        if finding.severity >= Severity::High {
            correlate_traffic(state, &cycle_id, finding).await;
        }
    }

    let mut partial = false;
    for finding in &findings {
        if Instant::now() >= deadline {
            partial = true;
            break;
        }
        if finding.severity < Severity::High {
            continue;
        }
        handle_escalation(state, &cycle_id, finding, &mut report).await;
    }

    pin_critical_findings(state, &findings);

    report.findings = findings;
    finish(report, partial)
}

fn finish(mut report: CycleReport, partial: bool) -> CycleReport {
    let finished_at = Utc::now();
    report.duration_ms = (finished_at - report.started_at).num_milliseconds().max(0) as u64;
    report.finished_at = Some(finished_at);
    report.partial = partial;
    report
}

fn diagnostics_task(cluster: &str) -> String {
    format!(
        "Survey cluster '{cluster}' for unhealthy workloads (CrashLoopBackOff, OOMKilled, \
         ImagePullBackOff, stuck Pending, or NotReady). Use the read-only kubernetes tools to \
         inspect pods and events. Reply with exactly one JSON object of the shape \
         {{\"findings\": [{{\"cluster\", \"namespace\", \"workload\", \"kind\", \"evidence\": \
         [..], \"first_seen\", \"last_seen\", \"restart_count\", \"replicas\", \
         \"replicas_ready\"}}]}} and nothing else. An empty `findings` array means the cluster \
         is healthy."
    )
}

fn find_service_mapping<'a>(state: &'a AppState, finding: &Finding) -> Option<&'a ServiceMapping> {
    state
        .config
        .cluster
        .service_map
        .values()
        .find(|m| m.cluster == finding.cluster && m.namespace == finding.namespace && m.deployment == finding.workload)
}

fn classify_severity(state: &AppState, finding: &mut Finding) {
    let tier = find_service_mapping(state, finding)
        .map(|m| m.criticality)
        .unwrap_or(ServiceTier::P2);
    let condition = downtime_condition(finding, state.config.cluster.thresholds.max_downtime_minutes);
    finding.severity = escalation_severity(tier, condition);
}

/// Run a single tool call directly through the Safety Hook Chain and the
/// catalog, the same way `turn::dispatch_one` does for a model-requested
/// call — used here for calls the orchestrator itself decides to make
/// (ticket search/create/comment, PR correlation, remediation, Teams
/// notification) rather than ones an LLM subagent asked for.
async fn dispatch_tool(
    state: &AppState,
    cycle_id: &str,
    tool_name: &str,
    arguments: Value,
    ctx: &SafetyContext,
) -> (String, bool) {
    let category = state
        .catalog
        .category_of(tool_name)
        .unwrap_or(ToolCategory::Read);
    let verdict = state.safety.check(cycle_id, tool_name, category, &arguments, ctx).await;
    if !verdict.is_allowed() {
        return (
            format!(
                "denied by safety policy: {}",
                verdict.reason.unwrap_or_else(|| "no reason given".into())
            ),
            true,
        );
    }
    let outcome = state.catalog.invoke(cycle_id, tool_name, arguments).await;
    (outcome.content, outcome.is_error)
}

fn safety_ctx_for(finding: &Finding) -> SafetyContext {
    SafetyContext {
        cluster: Some(finding.cluster.clone()),
        namespace: Some(finding.namespace.clone()),
        current_replicas: finding.replicas.map(i64::from),
    }
}

async fn gather_log_evidence(
    state: &AppState,
    cycle_id: &str,
    finding: &mut Finding,
    tool_defs: Vec<ki_domain::tool::ToolDefinition>,
) -> u64 {
    let task = format!(
        "Workload '{}' in namespace '{}' on cluster '{}' shows {}. Use get_logs and get_events \
         to find the concrete failure cause (the specific error, panic, or OOM reason — not just \
         the restart count). Reply with 2-4 short evidence lines, one concrete fact per line, no \
         preamble or markdown.",
        finding.workload, finding.namespace, finding.cluster, finding.kind
    );
    let (text, failed, tokens) = run_agent(state, "log-analyzer", &task, None, cycle_id, tool_defs).await;
    if failed {
        tracing::warn!(workload = %finding.workload, reason = %text, "log-analyzer delegation failed");
        return tokens;
    }
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        finding.evidence.push(line.to_string());
    }
    tokens
}

/// Correlate a finding against recently merged PRs in the owning repo
/// (§4.6 step 4): a merge within `first_seen ± 30 min` is attached as a
/// [`CorrelatedDeployment`].
async fn correlate_deployment(state: &AppState, cycle_id: &str, finding: &mut Finding) {
    let Some(mapping) = find_service_mapping(state, finding) else {
        return;
    };
    let (Some(owner), Some(repo)) = (mapping.repo_owner.clone(), mapping.repo_name.clone()) else {
        return;
    };

    let args = serde_json::json!({ "owner": owner, "repo": repo, "state": "closed" });
    let (content, is_error) =
        dispatch_tool(state, cycle_id, "list_prs", args, &safety_ctx_for(finding)).await;
    if is_error {
        return;
    }
    let Ok(prs) = serde_json::from_str::<Value>(&content) else {
        return;
    };
    let Some(items) = prs.as_array() else {
        return;
    };

    let window_start = finding.first_seen - ChronoDuration::minutes(30);
    let window_end = finding.first_seen + ChronoDuration::minutes(30);

    for pr in items {
        let Some(merged_at_str) = pr.get("merged_at").and_then(|v| v.as_str()) else {
            continue;
        };
        let Ok(merged_at) = DateTime::parse_from_rfc3339(merged_at_str) else {
            continue;
        };
        let merged_at = merged_at.with_timezone(&Utc);
        if merged_at >= window_start && merged_at <= window_end {
            finding.correlated_deployments.push(CorrelatedDeployment {
                repo: format!("{owner}/{repo}"),
                pr_number: pr.get("number").and_then(|v| v.as_u64()).unwrap_or(0),
                title: pr.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                merged_at,
            });
        }
    }
}

/// Optional NAT-gateway egress correlation via Datadog (§4.6 step 4, §9
/// open question) — only attempted when the cluster's service is mapped
/// to a NAT gateway and Datadog is configured.
async fn correlate_traffic(state: &AppState, cycle_id: &str, finding: &mut Finding) {
    if state.config.notify.datadog.is_none() {
        return;
    }
    let nat_gateway = state
        .config
        .cluster
        .nat_gateway_map
        .iter()
        .find(|(_, services)| services.iter().any(|s| s == &finding.workload))
        .map(|(gw, _)| gw.clone());
    let Some(nat_gateway) = nat_gateway else {
        return;
    };

    let args = serde_json::json!({
        "query": format!("sum:aws.natgateway.bytes_out_to_destination{{nat-gateway-id:{nat_gateway}}}"),
        "minutes_back": 60,
    });
    let (content, is_error) =
        dispatch_tool(state, cycle_id, "dd_query_timeseries", args, &safety_ctx_for(finding)).await;
    if is_error {
        return;
    }
    finding.correlated_traffic = Some(CorrelatedTraffic {
        nat_gateway,
        summary: super::truncate_str(&content, 500),
    });
}

/// Best-effort extraction of an existing open ticket from a raw Jira
/// `search_issues` response. The comment body's `restart_count=`/
/// `severity_rank=` lines are our own `format_comment` template (not an
/// external, unpredictable format), so plain substring scanning of the
/// most recent comment is sufficient to recover a
/// [`TicketMetricsSnapshot`] without a regex dependency.
fn parse_existing_ticket(base_url: &str, raw_json: &str) -> Option<TicketReference> {
    let root: Value = serde_json::from_str(raw_json).ok()?;
    let issue = root.get("issues").and_then(|i| i.as_array())?.first()?;

    let key = issue.get("key").and_then(|v| v.as_str())?.to_string();
    let fields = issue.get("fields")?;
    let state_name = fields
        .get("status")
        .and_then(|s| s.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();

    let comments = fields
        .get("comment")
        .and_then(|c| c.get("comments"))
        .and_then(|c| c.as_array());
    let last_comment = comments.and_then(|c| c.last());

    let last_comment_at = last_comment
        .and_then(|c| c.get("created"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    let last_known_metrics = last_comment
        .and_then(|c| c.get("body"))
        .and_then(|v| v.as_str())
        .and_then(parse_metrics_snapshot);

    Some(TicketReference {
        tracker: Tracker::Jira,
        key: key.clone(),
        url: format!("{}/browse/{}", base_url.trim_end_matches('/'), key),
        state: state_name,
        last_comment_at,
        last_known_metrics,
    })
}

/// Recover `restart_count=`/`severity_rank=` out of a comment body written
/// by [`format_comment`], via plain string scanning.
fn parse_metrics_snapshot(body: &str) -> Option<TicketMetricsSnapshot> {
    let restart_count = extract_u32_after(body, "restart_count=")?;
    let severity_rank = extract_u32_after(body, "severity_rank=")? as u8;
    Some(TicketMetricsSnapshot {
        restart_count,
        severity_rank,
    })
}

fn extract_u32_after(haystack: &str, marker: &str) -> Option<u32> {
    let start = haystack.find(marker)? + marker.len();
    let rest = &haystack[start..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

async fn search_existing_ticket(
    state: &AppState,
    cycle_id: &str,
    finding: &Finding,
) -> Option<TicketReference> {
    let jira = state.config.notify.jira.as_ref()?;
    let jql = search_query(&jira.project_key, finding);
    let args = serde_json::json!({ "jql": jql });
    let (content, is_error) =
        dispatch_tool(state, cycle_id, "search_issues", args, &safety_ctx_for(finding)).await;
    if is_error {
        return None;
    }
    parse_existing_ticket(&jira.base_url, &content)
}

async fn create_ticket(state: &AppState, cycle_id: &str, finding: &Finding) -> Option<String> {
    state.config.notify.jira.as_ref()?;
    let inputs = gate_inputs_from_history(finding, None, None);
    let snapshot = snapshot_for(finding);
    let description = format_comment(finding, &inputs, snapshot);
    let args = serde_json::json!({
        "summary": finding.ticket_summary(),
        "description": description,
        "priority": priority_for(finding).to_string(),
    });
    let (content, is_error) =
        dispatch_tool(state, cycle_id, "create_issue", args, &safety_ctx_for(finding)).await;
    if is_error {
        tracing::warn!(workload = %finding.workload, reason = %content, "ticket creation failed");
        return None;
    }
    serde_json::from_str::<Value>(&content)
        .ok()
        .and_then(|v| v.get("key").and_then(|k| k.as_str()).map(str::to_string))
}

async fn comment_ticket(state: &AppState, cycle_id: &str, key: &str, body: &str, ctx: &SafetyContext) {
    let args = serde_json::json!({ "key": key, "body": body });
    let (content, is_error) = dispatch_tool(state, cycle_id, "add_comment", args, ctx).await;
    if is_error {
        tracing::warn!(key, reason = %content, "ticket comment failed");
    }
}

async fn notify_teams(state: &AppState, cycle_id: &str, finding: &Finding, ctx: &SafetyContext) {
    if state.config.notify.teams.is_none() {
        return;
    }
    let title = finding.ticket_summary();
    let text = format!(
        "Severity {} in {}/{}. {} restart(s). {}",
        finding.severity,
        finding.namespace,
        finding.workload,
        finding.restart_count.unwrap_or(0),
        finding.evidence.first().map(String::as_str).unwrap_or("no additional evidence")
    );
    let args = serde_json::json!({ "title": title, "text": text });
    let (content, is_error) = dispatch_tool(state, cycle_id, "post_notification", args, ctx).await;
    if is_error {
        tracing::warn!(workload = %finding.workload, reason = %content, "teams notification failed");
    }
}

fn remediation_args(finding: &Finding, tool: &str) -> Value {
    match tool {
        "rollout_restart" => serde_json::json!({
            "cluster": finding.cluster,
            "namespace": finding.namespace,
            "deployment": finding.workload,
        }),
        "delete_pod" => serde_json::json!({
            "cluster": finding.cluster,
            "namespace": finding.namespace,
            "name": finding.workload,
        }),
        _ => serde_json::json!({}),
    }
}

/// Ticket correlation, escalation notification, and the approved
/// auto-remediation gate for one HIGH+ severity finding (§4.6 steps 5-7).
async fn handle_escalation(state: &AppState, cycle_id: &str, finding: &Finding, report: &mut CycleReport) {
    let fingerprint = finding.fingerprint();
    let ctx = safety_ctx_for(finding);

    if state.config.notify.jira.is_some() {
        let existing = search_existing_ticket(state, cycle_id, finding).await;
        let previous_severity_rank = existing
            .as_ref()
            .and_then(|t| t.last_known_metrics)
            .map(|m| m.severity_rank);
        let gate_inputs = gate_inputs_from_history(finding, previous_severity_rank, existing.as_ref());

        match &existing {
            None => match create_ticket(state, cycle_id, finding).await {
                Some(key) => {
                    report.tickets_touched.push(key.clone());
                    report.actions_taken.push(CycleAction {
                        finding_fingerprint: fingerprint.clone(),
                        kind: CycleActionKind::TicketCreated,
                        ticket_key: Some(key),
                        reason: None,
                    });
                }
                None => report.actions_taken.push(CycleAction {
                    finding_fingerprint: fingerprint.clone(),
                    kind: CycleActionKind::Error,
                    ticket_key: None,
                    reason: Some("ticket creation failed".into()),
                }),
            },
            Some(ticket) if should_comment(&gate_inputs) => {
                let snapshot = snapshot_for(finding);
                let comment = format_comment(finding, &gate_inputs, snapshot);
                comment_ticket(state, cycle_id, &ticket.key, &comment, &ctx).await;
                report.tickets_touched.push(ticket.key.clone());
                report.actions_taken.push(CycleAction {
                    finding_fingerprint: fingerprint.clone(),
                    kind: CycleActionKind::TicketCommented,
                    ticket_key: Some(ticket.key.clone()),
                    reason: None,
                });
            }
            Some(ticket) => report.actions_taken.push(CycleAction {
                finding_fingerprint: fingerprint.clone(),
                kind: CycleActionKind::TicketSkipped,
                ticket_key: Some(ticket.key.clone()),
                reason: Some("gates did not clear: no significant change since last comment".into()),
            }),
        }
    }

    let component = format!("{}/{}", finding.cluster, finding.workload);
    if state.notifier.should_send(&finding.severity.to_string(), &component) {
        state
            .notifier
            .notify_escalation(&finding.cluster, &finding.workload, &finding.severity.to_string(), &finding.kind.to_string())
            .await;
        notify_teams(state, cycle_id, finding, &ctx).await;
        report.actions_taken.push(CycleAction {
            finding_fingerprint: fingerprint.clone(),
            kind: CycleActionKind::NotificationSent,
            ticket_key: None,
            reason: None,
        });
    }

    // The gate's `already_applied_last_cycle` check needs the tool name it
    // would invoke, which the gate itself only determines internally — so
    // probe once assuming not-yet-applied, then re-check idempotence against
    // the tool that probe names before actually dispatching.
    let probe_ctx = RemediationContext {
        finding,
        protected_namespaces: &state.config.cluster.protected_namespaces,
        dev_clusters: &state.config.cluster.dev_clusters,
        approved_auto_remediation: &state.config.orchestrator.approved_auto_remediation,
        already_applied_last_cycle: false,
    };

    match approved_for_auto_remediation(&probe_ctx) {
        Ok(tool) => {
            let trial_ctx = RemediationContext {
                already_applied_last_cycle: state
                    .orchestrator_memory
                    .was_applied_last_cycle(&fingerprint, tool),
                ..probe_ctx
            };
            match approved_for_auto_remediation(&trial_ctx) {
                Ok(tool) => {
                    let args = remediation_args(finding, tool);
                    let (content, is_error) = dispatch_tool(state, cycle_id, tool, args, &ctx).await;
                    if is_error {
                        report.actions_taken.push(CycleAction {
                            finding_fingerprint: fingerprint.clone(),
                            kind: CycleActionKind::Error,
                            ticket_key: None,
                            reason: Some(format!("remediation '{tool}' failed: {content}")),
                        });
                    } else {
                        state.orchestrator_memory.record_applied(fingerprint.clone(), tool.to_string());
                        report.actions_taken.push(CycleAction {
                            finding_fingerprint: fingerprint.clone(),
                            kind: CycleActionKind::RemediationAttempted,
                            ticket_key: None,
                            reason: Some(format!("invoked {tool}")),
                        });
                    }
                }
                Err(reason) => report.actions_taken.push(CycleAction {
                    finding_fingerprint: fingerprint.clone(),
                    kind: CycleActionKind::RemediationSkipped,
                    ticket_key: None,
                    reason: Some(reason),
                }),
            }
        }
        Err(reason) => report.actions_taken.push(CycleAction {
            finding_fingerprint: fingerprint.clone(),
            kind: CycleActionKind::RemediationSkipped,
            ticket_key: None,
            reason: Some(reason),
        }),
    }
}

/// Pin every CRITICAL finding into the persistent orchestrator session so
/// it survives the session pruner across cycles (§4.4, §4.6).
fn pin_critical_findings(state: &AppState, findings: &[Finding]) {
    let critical: Vec<&Finding> = findings.iter().filter(|f| f.severity == Severity::Critical).collect();
    if critical.is_empty() {
        return;
    }
    let session = state.sessions.orchestrator_session();
    let mut guard = session.lock();
    for finding in critical {
        let text = format!(
            "CRITICAL: {} (first seen {})",
            finding.ticket_summary(),
            finding.first_seen.to_rfc3339()
        );
        let index = guard.messages.len();
        guard.push(ki_domain::tool::Message::assistant(text));
        guard.pin(index);
    }
    drop(guard);
    if let Err(e) = state.sessions.persist_orchestrator_session() {
        tracing::warn!(error = %e, "failed to persist orchestrator session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_u32_after_reads_digits_up_to_non_digit() {
        let body = "- restart_count=12\n- severity_rank=2\n";
        assert_eq!(extract_u32_after(body, "restart_count="), Some(12));
        assert_eq!(extract_u32_after(body, "severity_rank="), Some(2));
    }

    #[test]
    fn extract_u32_after_missing_marker_is_none() {
        assert_eq!(extract_u32_after("no markers here", "restart_count="), None);
    }

    #[test]
    fn parse_metrics_snapshot_round_trips_format_comment_template() {
        let snapshot = parse_metrics_snapshot("## Current Metrics\n- restart_count=9\n- severity_rank=3\n")
            .expect("snapshot should parse");
        assert_eq!(snapshot.restart_count, 9);
        assert_eq!(snapshot.severity_rank, 3);
    }

    #[test]
    fn parse_existing_ticket_reads_key_status_and_metrics() {
        let raw = serde_json::json!({
            "issues": [{
                "key": "OPS-42",
                "fields": {
                    "status": { "name": "In Progress" },
                    "comment": {
                        "comments": [{
                            "created": "2026-07-20T12:00:00Z",
                            "body": "- restart_count=4\n- severity_rank=1\n"
                        }]
                    }
                }
            }]
        })
        .to_string();

        let ticket = parse_existing_ticket("https://example.atlassian.net", &raw).expect("ticket");
        assert_eq!(ticket.key, "OPS-42");
        assert_eq!(ticket.state, "In Progress");
        assert_eq!(ticket.url, "https://example.atlassian.net/browse/OPS-42");
        let metrics = ticket.last_known_metrics.expect("metrics");
        assert_eq!(metrics.restart_count, 4);
        assert_eq!(metrics.severity_rank, 1);
    }

    #[test]
    fn parse_existing_ticket_empty_search_returns_none() {
        let raw = serde_json::json!({ "issues": [] }).to_string();
        assert!(parse_existing_ticket("https://example.atlassian.net", &raw).is_none());
    }

    #[test]
    fn orchestrator_memory_tracks_one_cycle_of_idempotence() {
        let mem = OrchestratorMemory::new();
        assert!(!mem.was_applied_last_cycle("fp1", "rollout_restart"));
        mem.record_applied("fp1".into(), "rollout_restart".into());
        assert!(!mem.was_applied_last_cycle("fp1", "rollout_restart"));
        mem.rotate();
        assert!(mem.was_applied_last_cycle("fp1", "rollout_restart"));
        assert!(!mem.was_applied_last_cycle("fp1", "delete_pod"));
    }
}
