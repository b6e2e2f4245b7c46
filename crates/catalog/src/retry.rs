//! Exponential-backoff retry wrapper for adapter calls.
//!
//! Generalizes the retry-on-transient-failure pattern `LlmRouter` uses for
//! provider fallback: `Throttled`/`Timeout` outcomes are retried, anything
//! else is surfaced immediately. Capped at 3 attempts, backoff capped at 10s.

use std::future::Future;
use std::time::Duration;

use ki_domain::error::ToolErrorKind;
use ki_domain::tool::ToolOutcome;

const MAX_ATTEMPTS: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Run `f` up to `MAX_ATTEMPTS` times, retrying only when the outcome is an
/// error classified as `Throttled` or `Timeout`.
pub async fn with_backoff<F, Fut>(f: F) -> ToolOutcome
where
    F: Fn() -> Fut,
    Fut: Future<Output = ToolOutcome>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = f().await;

        let retriable = matches!(
            outcome.error_kind,
            Some(ToolErrorKind::Throttled) | Some(ToolErrorKind::Timeout)
        );

        if !retriable || attempt >= MAX_ATTEMPTS {
            return outcome;
        }

        let backoff = std::cmp::min(
            Duration::from_millis(200 * 2u64.pow(attempt - 1)),
            MAX_BACKOFF,
        );
        tracing::warn!(attempt, ?backoff, "retrying tool call after transient failure");
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_on_throttled_then_succeeds() {
        let calls = AtomicU32::new(0);
        let outcome = with_backoff(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                ToolOutcome::error("c1", ToolErrorKind::Throttled, "rate limited")
            } else {
                ToolOutcome::ok("c1", "done")
            }
        })
        .await;

        assert!(!outcome.is_error);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retriable_errors() {
        let calls = AtomicU32::new(0);
        let outcome = with_backoff(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            ToolOutcome::error("c1", ToolErrorKind::NotFound, "missing")
        })
        .await;

        assert!(outcome.is_error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome = with_backoff(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            ToolOutcome::error("c1", ToolErrorKind::Timeout, "slow upstream")
        })
        .await;

        assert!(outcome.is_error);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
