//! Narrow LLM provider adapters — the only thing this crate does is turn
//! `(messages, tool_descriptors)` into a terminal assistant message or a set
//! of tool calls. The LLM itself is an external collaborator (see spec §1);
//! nothing here knows about Kubernetes, tickets, or subagent profiles.

pub mod anthropic;
pub mod openai_compat;
pub mod registry;
pub mod router;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use registry::ProviderRegistry;
pub use router::LlmRouter;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
