use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::metrics::proxy_metrics::TVL_CACHE_LOOKUPS;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    timestamp: Instant,
}

/// Short-lived upstream response cache keyed by upstream URL
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.timestamp.elapsed() < self.ttl => {
                TVL_CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
                debug!("(Cache) Hit for {}", key);
                Some(entry.value.clone())
            }
            _ => {
                TVL_CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
                None
            }
        }
    }

    /// Stores a value and drops anything already expired
    pub async fn put(&self, key: &str, value: Value) {
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.timestamp.elapsed() < ttl);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                timestamp: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        assert!(cache.get("k").await.is_none());
        cache.put("k", json!([1, 2])).await;
        assert_eq!(cache.get("k").await, Some(json!([1, 2])));
        assert!(cache.get("other").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_miss_and_are_evicted() {
        let cache = ResponseCache::new(Duration::from_millis(20));
        cache.put("a", json!(1)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("a").await.is_none());

        cache.put("b", json!(2)).await;
        assert_eq!(cache.len().await, 1);
    }
}
