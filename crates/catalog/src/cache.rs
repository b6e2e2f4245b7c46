//! Small TTL cache for CloudWatch/Datadog timeseries queries, keyed by
//! `(metric, time_window)`. Same `RwLock<HashMap<K, V>>` shape the teacher
//! uses for `runtime/quota.rs::QuotaTracker`, generalized from a daily
//! rollover to a fixed TTL per entry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Default 5-minute cache per §4.1's CloudWatch/Datadog caching contract.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(300))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    pub fn put(&self, key: String, value: V) {
        self.entries.write().insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_for_missing_key() {
        let cache: TtlCache<String> = TtlCache::with_default_ttl();
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn returns_cached_value_within_ttl() {
        let cache: TtlCache<String> = TtlCache::with_default_ttl();
        cache.put("cpu:5m".into(), "42".into());
        assert_eq!(cache.get("cpu:5m"), Some("42".into()));
    }

    #[test]
    fn expires_entries_past_ttl() {
        let cache: TtlCache<String> = TtlCache::new(Duration::from_millis(10));
        cache.put("cpu:5m".into(), "42".into());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("cpu:5m").is_none());
    }
}
