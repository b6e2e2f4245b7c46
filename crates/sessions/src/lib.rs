//! Session management for the incident-sentinel gateway.
//!
//! Owns two kinds of conversation state behind one bounded, per-session-locked
//! store: on-demand query sessions (TTL-evicted, hard-capped by count) and the
//! single persistent orchestrator session (size-pruned only). Both share the
//! deterministic 5-step pruner in [`store`].

pub mod store;

pub use store::{
    prune_structural, PruneOutcome, Session, SessionFlags, SessionStats, SessionStore,
    ORCHESTRATOR_SESSION_ID,
};
