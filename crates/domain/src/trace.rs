use serde::Serialize;

/// Structured trace events emitted across the gateway via `tracing`.
///
/// Distinct from the durable safety-hook audit log (see the gateway's
/// `runtime::safety` module): these are ambient observability, not the
/// append-only audit trail, though both share this one-struct-per-line
/// JSON idiom.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    CycleStarted {
        cycle_id: String,
        cluster: String,
    },
    CycleCompleted {
        cycle_id: String,
        cluster: String,
        findings: usize,
        duration_ms: u64,
    },
    CycleSkipped {
        cluster: String,
        reason: String,
    },
    ToolDispatched {
        call_id: String,
        tool_name: String,
        category: String,
    },
    ToolCompleted {
        call_id: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
    },
    SafetyDenied {
        tool_name: String,
        rule: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    SessionResolved {
        session_key: String,
        session_id: String,
        is_new: bool,
    },
    SessionPruned {
        session_id: String,
        dropped_pairs: usize,
        summarized: bool,
    },
    SessionReset {
        session_key: String,
        old_session_id: String,
        new_session_id: String,
        reason: String,
    },
    TicketCorrelated {
        incident_fingerprint: String,
        ticket_key: Option<String>,
        action: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ki_event");
    }
}
