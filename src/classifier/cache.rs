use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    result: bool,
    timestamp: Instant,
}

/// Classifier results keyed by content fingerprint, so identical content
/// seen in different posts is only classified once per TTL.
#[derive(Debug)]
pub struct ClassifierCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ClassifierCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Live entry for `key`, if any.
    pub fn get(&self, key: &str, now: Instant) -> Option<bool> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .get(key)
            .filter(|entry| now.saturating_duration_since(entry.timestamp) < self.ttl)
            .map(|entry| entry.result)
    }

    pub fn insert(&self, key: String, result: bool, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        // Expired entries are dropped on write.
        let ttl = self.ttl;
        entries.retain(|_, entry| now.saturating_duration_since(entry.timestamp) < ttl);
        entries.insert(
            key,
            CacheEntry {
                result,
                timestamp: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl Default for ClassifierCache {
    fn default() -> Self {
        Self::new(CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = ClassifierCache::new(Duration::from_secs(300));
        let start = Instant::now();
        cache.insert("text_gm".to_string(), true, start);

        assert_eq!(cache.get("text_gm", start + Duration::from_secs(299)), Some(true));
        assert_eq!(cache.get("text_gm", start + Duration::from_secs(300)), None);
        assert_eq!(cache.get("text_other", start), None);
    }

    #[test]
    fn test_insert_evicts_expired() {
        let cache = ClassifierCache::new(Duration::from_secs(10));
        let start = Instant::now();
        cache.insert("a".to_string(), false, start);
        cache.insert("b".to_string(), true, start + Duration::from_secs(11));
        assert_eq!(cache.len(), 1);
    }
}
