//! Gateway-owned session store.
//!
//! Holds conversation histories with bounded footprint. Two variants share
//! one implementation: on-demand **query sessions** (TTL-evicted, hard-capped
//! by count) and a single persistent **orchestrator session** (no TTL, size
//! pruned only). Every session is protected by its own lock; the top-level
//! map lock is held only briefly for lookup/insert/remove.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use ki_domain::config::SessionsConfig;
use ki_domain::error::{Error, Result};
use ki_domain::tool::{ContentPart, Message, MessageContent, Role};
use ki_domain::trace::TraceEvent;

/// Well-known id of the single persistent orchestrator session.
pub const ORCHESTRATOR_SESSION_ID: &str = "orchestrator";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flags carried alongside a session's message history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFlags {
    /// Indices into `messages` that the pruner must never drop.
    #[serde(default)]
    pub pinned_indices: BTreeSet<usize>,
}

/// A single conversation history bound to either an HTTP client interaction
/// or the orchestrator's cycle-to-cycle context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub token_estimate: u64,
    pub flags: SessionFlags,
    /// Token budget for this session; the pruner triggers at
    /// `prune_trigger_ratio` of this value.
    pub max_tokens: u64,
    /// `None` for the persistent orchestrator session (TTL disabled).
    pub ttl_minutes: Option<i64>,
}

impl Session {
    fn new(id: String, max_tokens: u64, ttl_minutes: Option<i64>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            messages: Vec::new(),
            token_estimate: 0,
            flags: SessionFlags::default(),
            max_tokens,
            ttl_minutes,
        }
    }

    /// Append a message, recompute the running token estimate, and bump
    /// `last_used_at`.
    pub fn push(&mut self, message: Message) {
        self.token_estimate += estimate_tokens_one(&message);
        self.messages.push(message);
        self.last_used_at = Utc::now();
    }

    /// Pin a message index so the pruner never drops it (e.g. a newly
    /// detected CRITICAL finding the orchestrator wants to survive cycles).
    pub fn pin(&mut self, index: usize) {
        if index < self.messages.len() {
            self.flags.pinned_indices.insert(index);
        }
    }

    /// Whether this session's token estimate has crossed the prune trigger
    /// threshold.
    pub fn needs_pruning(&self, trigger_ratio: f64) -> bool {
        self.token_estimate as f64 >= self.max_tokens as f64 * trigger_ratio
    }
}

/// Rough token estimator: ~4 characters per token, plus a fixed per-message
/// overhead for role/structure framing. Good enough for a pruning trigger;
/// not billed against provider-reported usage.
fn estimate_tokens_one(message: &Message) -> u64 {
    let text_len = message.content.extract_all_text().len() as u64;
    let parts_overhead = match &message.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::ToolUse { input, .. } => input.to_string().len() as u64 / 4,
                ContentPart::ToolResult { content, .. } => content.len() as u64 / 4,
                _ => 0,
            })
            .sum(),
        MessageContent::Text(_) => 0,
    };
    (text_len / 4) + parts_overhead + 4
}

/// Recompute a session's token estimate from scratch (used after pruning).
fn recompute_token_estimate(messages: &[Message]) -> u64 {
    messages.iter().map(estimate_tokens_one).sum()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deterministic 5-step pruner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of a structural pruning pass (steps 1-4 of the policy).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub dropped_pairs: usize,
    pub dropped_turns: usize,
    /// If true, steps 1-4 did not bring the session under the trigger
    /// threshold and only pinned + system messages remain — the caller must
    /// perform step 5 (summarize the oldest pinned turns via the summarizer
    /// role) and call [`Session::summarize_and_unpin`].
    pub needs_summary: bool,
}

/// Run the deterministic structural pruner (steps 1-4) against a session.
/// Idempotent: pruning an already-below-threshold session is a no-op.
///
/// 1. Never drop `messages[0]` (system prompt).
/// 2. Never drop any message whose index is in `flags.pinned_indices`.
/// 3. Drop oldest non-pinned `(ToolCall, ToolResult)` pairs first, as units.
/// 4. If still above threshold, drop oldest non-pinned assistant/user text turns.
pub fn prune_structural(session: &mut Session, trigger_ratio: f64) -> PruneOutcome {
    if !session.needs_pruning(trigger_ratio) {
        return PruneOutcome::default();
    }

    let mut outcome = PruneOutcome::default();

    // Step 3: drop oldest non-pinned (ToolCall, ToolResult) pairs as units.
    // A pair is an assistant message containing ToolUse parts immediately
    // followed by the tool-result message(s) that answer it.
    loop {
        if !session.needs_pruning(trigger_ratio) {
            break;
        }
        match find_oldest_droppable_pair(session) {
            Some((start, end)) => {
                drop_range(session, start, end);
                session.token_estimate = recompute_token_estimate(&session.messages);
                outcome.dropped_pairs += 1;
            }
            None => break,
        }
    }

    // Step 4: drop oldest non-pinned assistant/user text turns.
    while session.needs_pruning(trigger_ratio) {
        match find_oldest_droppable_text_turn(session) {
            Some(idx) => {
                drop_range(session, idx, idx);
                session.token_estimate = recompute_token_estimate(&session.messages);
                outcome.dropped_turns += 1;
            }
            None => break,
        }
    }

    outcome.needs_summary = session.needs_pruning(trigger_ratio);

    if outcome.dropped_pairs > 0 || outcome.dropped_turns > 0 {
        TraceEvent::SessionPruned {
            session_id: session.id.clone(),
            dropped_pairs: outcome.dropped_pairs,
            summarized: false,
        }
        .emit();
    }

    outcome
}

/// Remove messages `[start..=end]`, shifting `flags.pinned_indices` down to
/// match the new indices.
fn drop_range(session: &mut Session, start: usize, end: usize) {
    let removed = end - start + 1;
    session.messages.drain(start..=end);
    session.flags.pinned_indices = session
        .flags
        .pinned_indices
        .iter()
        .filter_map(|&idx| {
            if idx < start {
                Some(idx)
            } else if idx > end {
                Some(idx - removed)
            } else {
                None
            }
        })
        .collect();
}

fn is_pinned_or_system(session: &Session, idx: usize) -> bool {
    idx == 0 || session.flags.pinned_indices.contains(&idx)
}

/// Find the oldest (assistant-with-tool-use, tool-result...) pair that is
/// entirely non-pinned, returning its `[start, end]` index range.
fn find_oldest_droppable_pair(session: &Session) -> Option<(usize, usize)> {
    let mut i = 1; // never consider index 0 (system prompt)
    while i < session.messages.len() {
        let msg = &session.messages[i];
        let has_tool_use = msg.role == Role::Assistant
            && matches!(&msg.content, MessageContent::Parts(parts)
                if parts.iter().any(|p| matches!(p, ContentPart::ToolUse { .. })));

        if has_tool_use {
            let mut end = i;
            let mut j = i + 1;
            while j < session.messages.len() && session.messages[j].role == Role::Tool {
                end = j;
                j += 1;
            }

            let pinned_in_range = (i..=end).any(|idx| is_pinned_or_system(session, idx));
            if !pinned_in_range {
                return Some((i, end));
            }
            i = end + 1;
        } else {
            i += 1;
        }
    }
    None
}

/// Find the oldest non-pinned, non-system, non-tool-pair text turn.
fn find_oldest_droppable_text_turn(session: &Session) -> Option<usize> {
    for idx in 1..session.messages.len() {
        if is_pinned_or_system(session, idx) {
            continue;
        }
        let role = session.messages[idx].role;
        if matches!(role, Role::User | Role::Assistant | Role::Tool) {
            return Some(idx);
        }
    }
    None
}

impl Session {
    /// Step 5 of the pruner: collapse the oldest pinned (non-system) turns
    /// into a single synthetic summary turn and unpin them. Called by the
    /// gateway after it has produced `summary_text` via the summarizer role.
    pub fn summarize_and_unpin(&mut self, summary_text: String) {
        let mut oldest_pinned: Vec<usize> = self
            .flags
            .pinned_indices
            .iter()
            .copied()
            .filter(|&idx| idx != 0)
            .collect();
        oldest_pinned.sort_unstable();

        if oldest_pinned.is_empty() {
            return;
        }

        let start = oldest_pinned[0];
        let end = *oldest_pinned.last().unwrap();

        drop_range(self, start, end);
        self.messages.insert(
            start,
            Message::assistant(format!("Previously: {summary_text}")),
        );
        self.token_estimate = recompute_token_estimate(&self.messages);

        TraceEvent::SessionPruned {
            session_id: self.id.clone(),
            dropped_pairs: 0,
            summarized: true,
        }
        .emit();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Eviction/sweeper stats, exposed via `sessions.stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub ttl_evictions: u64,
    pub hard_cap_evictions: u64,
}

/// Bounded in-memory map of session id -> conversation history.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    config: SessionsConfig,
    state_dir: PathBuf,
    ttl_evictions: std::sync::atomic::AtomicU64,
    hard_cap_evictions: std::sync::atomic::AtomicU64,
}

impl SessionStore {
    /// Construct a store rooted at `state_path`. If a persisted orchestrator
    /// session snapshot exists, it is loaded; otherwise a fresh one is
    /// created lazily on first use.
    pub fn new(state_path: &Path, config: SessionsConfig) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;

        let store = Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            state_dir: state_path.to_path_buf(),
            ttl_evictions: std::sync::atomic::AtomicU64::new(0),
            hard_cap_evictions: std::sync::atomic::AtomicU64::new(0),
        };

        let snapshot_path = store.orchestrator_snapshot_path();
        if snapshot_path.exists() {
            let raw = std::fs::read_to_string(&snapshot_path).map_err(Error::Io)?;
            let session: Session = serde_json::from_str(&raw).map_err(Error::Json)?;
            store
                .sessions
                .write()
                .insert(ORCHESTRATOR_SESSION_ID.to_string(), Arc::new(Mutex::new(session)));
            tracing::info!("restored persistent orchestrator session from snapshot");
        }

        Ok(store)
    }

    fn orchestrator_snapshot_path(&self) -> PathBuf {
        self.state_dir.join("orchestrator_session.json")
    }

    /// Create a new on-demand query session (TTL-bound). Enforces the hard
    /// cap by evicting the oldest-by-last-used session if needed.
    pub fn create_query_session(&self) -> Arc<Mutex<Session>> {
        self.enforce_hard_cap();

        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(
            id.clone(),
            self.config.max_tokens,
            Some(self.config.query_ttl_minutes),
        );
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().insert(id.clone(), handle.clone());

        TraceEvent::SessionResolved {
            session_key: id.clone(),
            session_id: id,
            is_new: true,
        }
        .emit();

        handle
    }

    /// Resolve the persistent orchestrator session, creating it on first
    /// call.
    pub fn orchestrator_session(&self) -> Arc<Mutex<Session>> {
        {
            let sessions = self.sessions.read();
            if let Some(handle) = sessions.get(ORCHESTRATOR_SESSION_ID) {
                return handle.clone();
            }
        }

        let session = Session::new(
            ORCHESTRATOR_SESSION_ID.to_string(),
            self.config.max_tokens,
            None,
        );
        let handle = Arc::new(Mutex::new(session));
        self.sessions
            .write()
            .insert(ORCHESTRATOR_SESSION_ID.to_string(), handle.clone());
        handle
    }

    /// Look up a session handle by id.
    pub fn get(&self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().get(id).cloned()
    }

    /// Destroy a session.
    pub fn delete(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Persist the orchestrator session snapshot atomically (tmp + rename).
    pub fn persist_orchestrator_session(&self) -> Result<()> {
        let handle = match self.sessions.read().get(ORCHESTRATOR_SESSION_ID).cloned() {
            Some(h) => h,
            None => return Ok(()),
        };
        let session = handle.lock();
        let json = serde_json::to_string_pretty(&*session).map_err(Error::Json)?;

        let final_path = self.orchestrator_snapshot_path();
        let tmp_path = final_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(Error::Io)?;
        std::fs::rename(&tmp_path, &final_path).map_err(Error::Io)?;
        Ok(())
    }

    /// Sweep TTL-expired query sessions. Runs on a `tokio::time::interval`
    /// loop at `config.sweep_interval_seconds` cadence (≤ 60s).
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(id, handle)| {
                    id.as_str() != ORCHESTRATOR_SESSION_ID && {
                        let s = handle.lock();
                        match s.ttl_minutes {
                            Some(ttl) => {
                                now.signed_duration_since(s.last_used_at).num_minutes() >= ttl
                            }
                            None => false,
                        }
                    }
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write();
        for id in &expired {
            sessions.remove(id);
        }
        self.ttl_evictions
            .fetch_add(expired.len() as u64, std::sync::atomic::Ordering::Relaxed);
        tracing::info!(count = expired.len(), "swept TTL-expired query sessions");
        expired.len()
    }

    /// Evict the oldest-by-last-used query session if the hard cap is
    /// exceeded. Called before creating a new session.
    fn enforce_hard_cap(&self) {
        let over_cap = self.sessions.read().len() >= self.config.max_sessions;
        if !over_cap {
            return;
        }

        let oldest: Option<String> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter(|(id, _)| id.as_str() != ORCHESTRATOR_SESSION_ID)
                .min_by_key(|(_, handle)| handle.lock().last_used_at)
                .map(|(id, _)| id.clone())
        };

        if let Some(id) = oldest {
            self.sessions.write().remove(&id);
            self.hard_cap_evictions
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::warn!(session_id = %id, "evicted oldest session: hard cap exceeded");
        }
    }

    /// Number of active sessions (including the orchestrator session, if
    /// created).
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active_sessions: self.sessions.read().len(),
            ttl_evictions: self.ttl_evictions.load(std::sync::atomic::Ordering::Relaxed),
            hard_cap_evictions: self
                .hard_cap_evictions
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    /// The configured prune-trigger ratio (e.g. 0.8 for 80%).
    pub fn prune_trigger_ratio(&self) -> f64 {
        self.config.prune_trigger_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ki_domain::tool::{ContentPart, MessageContent, Role};

    fn sys_session(max_tokens: u64) -> Session {
        let mut s = Session::new("s1".into(), max_tokens, Some(30));
        s.push(Message::system("you are a cluster triage assistant"));
        s
    }

    fn tool_pair(call_id: &str) -> (Message, Message) {
        let assistant = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![ContentPart::ToolUse {
                id: call_id.into(),
                name: "list_pods".into(),
                input: serde_json::json!({}),
            }]),
        };
        let result = Message::tool_result(call_id, "x".repeat(2000));
        (assistant, result)
    }

    #[test]
    fn needs_pruning_respects_trigger_ratio() {
        let mut s = sys_session(1000);
        assert!(!s.needs_pruning(0.8));
        s.push(Message::user("x".repeat(4000)));
        assert!(s.needs_pruning(0.8));
    }

    #[test]
    fn pruning_below_threshold_is_noop() {
        let mut s = sys_session(1_000_000);
        s.push(Message::user("hello"));
        let before = s.messages.len();
        let outcome = prune_structural(&mut s, 0.8);
        assert_eq!(outcome, PruneOutcome::default());
        assert_eq!(s.messages.len(), before);
    }

    #[test]
    fn pruner_never_drops_system_prompt() {
        let mut s = sys_session(100);
        for i in 0..5 {
            let (a, r) = tool_pair(&format!("c{i}"));
            s.push(a);
            s.push(r);
        }
        prune_structural(&mut s, 0.1);
        assert!(matches!(s.messages[0].role, Role::System));
    }

    #[test]
    fn pruner_drops_oldest_tool_pairs_as_units() {
        let mut s = sys_session(500);
        for i in 0..6 {
            let (a, r) = tool_pair(&format!("c{i}"));
            s.push(a);
            s.push(r);
        }
        let before_tokens = s.token_estimate;
        let outcome = prune_structural(&mut s, 0.3);
        assert!(outcome.dropped_pairs > 0);
        assert!(s.token_estimate < before_tokens);
        // No message should be a tool result without a matching tool_use.
        for w in s.messages.windows(2) {
            if w[1].role == Role::Tool {
                assert!(matches!(w[0].role, Role::Assistant | Role::Tool));
            }
        }
    }

    #[test]
    fn pruner_never_drops_pinned_pair() {
        let mut s = sys_session(400);
        let (a, r) = tool_pair("pinned-call");
        s.push(a);
        s.pin(1);
        s.push(r);
        s.pin(2);
        for i in 0..4 {
            let (a2, r2) = tool_pair(&format!("c{i}"));
            s.push(a2);
            s.push(r2);
        }
        prune_structural(&mut s, 0.1);
        assert!(s
            .messages
            .iter()
            .any(|m| matches!(&m.content, MessageContent::Parts(parts)
                if parts.iter().any(|p| matches!(p, ContentPart::ToolUse { id, .. } if id == "pinned-call")))));
    }

    #[test]
    fn pruner_falls_back_to_text_turns_after_pairs_exhausted() {
        let mut s = sys_session(200);
        s.push(Message::user("turn one"));
        s.push(Message::assistant("turn one reply"));
        s.push(Message::user("x".repeat(3000)));
        let outcome = prune_structural(&mut s, 0.05);
        assert!(outcome.dropped_turns > 0 || outcome.dropped_pairs > 0);
    }

    #[test]
    fn summarize_and_unpin_collapses_pinned_range() {
        let mut s = sys_session(1_000_000);
        s.push(Message::user("finding A"));
        s.pin(1);
        s.push(Message::user("finding B"));
        s.pin(2);
        s.summarize_and_unpin("two prior findings".into());
        assert!(s.flags.pinned_indices.is_empty());
        assert!(s.messages[1]
            .content
            .extract_all_text()
            .starts_with("Previously:"));
    }

    #[test]
    fn store_create_and_get_query_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), SessionsConfig::default()).unwrap();
        let handle = store.create_query_session();
        let id = handle.lock().id.clone();
        assert!(store.get(&id).is_some());
        assert_eq!(store.stats().active_sessions, 1);
    }

    #[test]
    fn store_hard_cap_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionsConfig::default();
        config.max_sessions = 2;
        let store = SessionStore::new(dir.path(), config).unwrap();

        let first = store.create_query_session();
        let first_id = first.lock().id.clone();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.create_query_session();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.create_query_session();

        assert!(store.get(&first_id).is_none());
        assert_eq!(store.stats().hard_cap_evictions, 1);
    }

    #[test]
    fn store_orchestrator_session_has_no_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), SessionsConfig::default()).unwrap();
        let handle = store.orchestrator_session();
        assert_eq!(handle.lock().ttl_minutes, None);
    }

    #[test]
    fn sweep_expired_never_evicts_orchestrator_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), SessionsConfig::default()).unwrap();
        store.orchestrator_session();
        store.sweep_expired();
        assert!(store.get(ORCHESTRATOR_SESSION_ID).is_some());
    }
}
