//! Per-(route, identity) token-bucket rate limiter (§4.9).
//!
//! Identity is the caller's API key when present, else their source IP.
//! Buckets are created lazily on first use and refill continuously based
//! on elapsed wall-clock time — no background sweep thread; a bucket that
//! hasn't been touched in a while simply refills to full the next time
//! it's looked up.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use ki_domain::config::RouteRateLimit;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Bucket>>,
}

/// Outcome of a rate-limit check; `retry_after` is only meaningful when
/// `allowed` is false.
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Check and, if allowed, consume one token from the `(route, identity)`
    /// bucket governed by `limit`.
    pub fn check(&self, route: &str, identity: &str, limit: &RouteRateLimit) -> RateLimitDecision {
        let key = format!("{route}:{identity}");
        let capacity = limit.burst.max(1) as f64;
        let refill_per_sec = limit.requests_per_minute as f64 / 60.0;
        let now = Instant::now();

        let mut buckets = self.buckets.write();
        let bucket = buckets.entry(key).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitDecision {
                allowed: true,
                retry_after: Duration::ZERO,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait_secs = if refill_per_sec > 0.0 {
                deficit / refill_per_sec
            } else {
                60.0
            };
            RateLimitDecision {
                allowed: false,
                retry_after: Duration::from_secs_f64(wait_secs.max(0.0)),
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(rpm: u32, burst: u32) -> RouteRateLimit {
        RouteRateLimit {
            requests_per_minute: rpm,
            burst,
        }
    }

    #[test]
    fn first_call_within_burst_is_allowed() {
        let limiter = RateLimiter::new();
        let decision = limiter.check("query", "key-a", &limit(60, 10));
        assert!(decision.allowed);
    }

    #[test]
    fn exceeding_burst_denies_with_retry_after() {
        let limiter = RateLimiter::new();
        let l = limit(60, 2);
        assert!(limiter.check("query", "key-a", &l).allowed);
        assert!(limiter.check("query", "key-a", &l).allowed);
        let decision = limiter.check("query", "key-a", &l);
        assert!(!decision.allowed);
        assert!(decision.retry_after.as_secs_f64() > 0.0);
    }

    #[test]
    fn distinct_identities_have_independent_buckets() {
        let limiter = RateLimiter::new();
        let l = limit(60, 1);
        assert!(limiter.check("query", "key-a", &l).allowed);
        assert!(limiter.check("query", "key-b", &l).allowed);
    }

    #[test]
    fn distinct_routes_have_independent_buckets() {
        let limiter = RateLimiter::new();
        let l = limit(60, 1);
        assert!(limiter.check("query", "key-a", &l).allowed);
        assert!(limiter.check("session.create", "key-a", &l).allowed);
    }
}
