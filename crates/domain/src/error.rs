/// Shared error type used across every incident-sentinel crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("cluster guard: {0}")]
    ClusterGuard(String),

    #[error("tool {tool}: {kind}: {message}")]
    Tool {
        tool: String,
        kind: ToolErrorKind,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy every tool adapter maps its failures onto. Carried as data
/// through `ToolOutcome` rather than raised as an exception — a tool error
/// is always a normal return value the LLM driver feeds back to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    NotFound,
    Unauthorized,
    Throttled,
    Timeout,
    Validation,
    Upstream,
    Cancelled,
    Fatal,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::Unauthorized => "unauthorized",
            ToolErrorKind::Throttled => "throttled",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::Validation => "validation",
            ToolErrorKind::Upstream => "upstream",
            ToolErrorKind::Cancelled => "cancelled",
            ToolErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

impl ToolErrorKind {
    /// Whether a failure of this kind is worth retrying with backoff.
    pub fn is_retryable(self) -> bool {
        matches!(self, ToolErrorKind::Throttled | ToolErrorKind::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ToolErrorKind::Throttled.is_retryable());
        assert!(ToolErrorKind::Timeout.is_retryable());
        assert!(!ToolErrorKind::Validation.is_retryable());
        assert!(!ToolErrorKind::Fatal.is_retryable());
    }
}
