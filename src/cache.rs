//! Short-TTL memoization of hot aggregate reads.
//!
//! Keys are derived from the endpoint name plus canonicalized query
//! parameters so equivalent requests share an entry. The sync engine clears
//! the cache after every applied batch, so stale reads are bounded by the
//! sync cycle even within the TTL.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: Value,
    expires_at: Instant,
}

pub struct QueryCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Canonical key: endpoint + sorted `k=v` pairs.
    pub fn key(endpoint: &str, params: &[(&str, String)]) -> String {
        let mut pairs: Vec<String> = params
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        pairs.sort();
        format!("{endpoint}?{}", pairs.join("&"))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, value: Value) {
        let mut entries = self.entries.lock();
        entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Fetch through the cache.
    pub fn get_or_compute(
        &self,
        key: String,
        compute: impl FnOnce() -> anyhow::Result<Value>,
    ) -> anyhow::Result<Value> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = compute()?;
        self.put(key, value.clone());
        Ok(value)
    }

    /// Drop everything (called after data changes).
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Drop only expired entries (periodic sweep).
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_order_independent() {
        let a = QueryCache::key(
            "summary",
            &[("start", "2024-06-01".into()), ("sales", "retail".into())],
        );
        let b = QueryCache::key(
            "summary",
            &[("sales", "retail".into()), ("start", "2024-06-01".into())],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn empty_params_are_dropped_from_key() {
        let a = QueryCache::key("summary", &[("brand", String::new())]);
        let b = QueryCache::key("summary", &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn hit_within_ttl_and_clear() {
        let cache = QueryCache::new(60);
        let mut computed = 0;
        let key = "k".to_string();

        let first = cache
            .get_or_compute(key.clone(), || {
                computed += 1;
                Ok(json!({"v": 1}))
            })
            .unwrap();
        let second = cache
            .get_or_compute(key.clone(), || {
                computed += 1;
                Ok(json!({"v": 2}))
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(computed, 1);

        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_miss() {
        let cache = QueryCache::new(0);
        cache.put("k".into(), json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }
}
