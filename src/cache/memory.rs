use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{pattern_matches, CacheManager};

/// Cap for lifetimes too large to add to `Instant::now()`
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local cache. Expired entries are dropped lazily on access or in
/// bulk by `purge_expired`.
#[derive(Debug)]
pub struct InMemoryCacheManager {
    entries: RwLock<HashMap<String, Entry>>,
    default_ttl: Duration,
}

impl InMemoryCacheManager {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Drop every expired entry and return how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for InMemoryCacheManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl CacheManager for InMemoryCacheManager {
    async fn get_raw(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        None
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = now.checked_add(ttl).or_else(|| now.checked_add(MAX_TTL)).unwrap_or(now);
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
    }

    async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn remove_pattern(&self, pattern: &str) -> u64 {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern_matches(pattern, key));
        let removed = (before - entries.len()) as u64;

        tracing::debug!(pattern, removed, "Removed cache entries by pattern");
        removed
    }

    async fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|entry| entry.is_live(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManagerExt;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let cache = InMemoryCacheManager::new(Duration::from_secs(u64::MAX));

        cache.set_raw("forever", "1".to_string(), None).await;
        cache.set_raw("also-forever", "2".to_string(), Some(Duration::MAX)).await;

        assert_eq!(cache.get_raw("forever").await.as_deref(), Some("1"));
        assert!(cache.exists("also-forever").await);
        assert_eq!(cache.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_set_and_get_typed() {
        let cache = InMemoryCacheManager::default();
        let value = Snapshot { id: 7, name: "seven".to_string() };

        cache.set("snap:7", &value, None).await;

        assert_eq!(cache.get::<Snapshot>("snap:7").await, Some(value));
        assert!(cache.exists("snap:7").await);
        assert_eq!(cache.get::<Snapshot>("snap:8").await, None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = InMemoryCacheManager::default();
        cache.set_raw("short", "1".to_string(), Some(Duration::from_millis(20))).await;
        cache.set_raw("long", "2".to_string(), None).await;

        assert!(cache.exists("short").await);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!cache.exists("short").await);
        assert_eq!(cache.get_raw("short").await, None);
        assert_eq!(cache.get_raw("long").await.as_deref(), Some("2"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = InMemoryCacheManager::default();
        cache.set_raw("a", "1".to_string(), Some(Duration::from_millis(10))).await;
        cache.set_raw("b", "2".to_string(), Some(Duration::from_millis(10))).await;
        cache.set_raw("c", "3".to_string(), None).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired().await, 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_pattern_leaves_other_keys() {
        let cache = InMemoryCacheManager::default();
        for key in ["customers:id:1", "customers:list:page:1:20", "customers:stats", "orders:1"] {
            cache.set_raw(key, "{}".to_string(), None).await;
        }

        assert_eq!(cache.remove_pattern("customers:list:*").await, 1);
        assert!(cache.exists("customers:id:1").await);

        assert_eq!(cache.remove_pattern("customers:*").await, 2);
        assert!(cache.exists("orders:1").await);
        assert_eq!(cache.remove_pattern("customers:*").await, 0);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let cache = InMemoryCacheManager::default();
        cache.set_raw("snap:bad", "not json".to_string(), None).await;

        assert_eq!(cache.get::<Snapshot>("snap:bad").await, None);
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = InMemoryCacheManager::default();
        cache.set_raw("k", "v".to_string(), None).await;
        cache.remove("k").await;
        cache.remove("missing").await;
        assert!(!cache.exists("k").await);
    }
}
