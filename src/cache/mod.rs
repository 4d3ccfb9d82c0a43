use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

mod memory;
mod redis;

pub use self::memory::InMemoryCacheManager;
pub use self::redis::RedisCacheManager;

// ============================================================================
// Cache Manager Contract
// ============================================================================
//
// Values are JSON strings under string keys. The cache is an optimisation,
// never a source of truth: a backend failure, a timeout or an undecodable
// payload is logged and reported as a miss. Nothing here returns an error.
//
// ============================================================================

#[async_trait]
pub trait CacheManager: Send + Sync {
    async fn get_raw(&self, key: &str) -> Option<String>;

    /// `None` ttl uses the manager's default
    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>);

    async fn remove(&self, key: &str);

    /// Glob pattern (`*`, `?`). Returns how many keys were removed.
    async fn remove_pattern(&self, pattern: &str) -> u64;

    async fn exists(&self, key: &str) -> bool;
}

/// Typed access on top of the raw JSON contract
#[async_trait]
pub trait CacheManagerExt: CacheManager {
    async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>)
    where
        T: Serialize + Sync,
    {
        match serde_json::to_string(value) {
            Ok(json) => self.set_raw(key, json, ttl).await,
            Err(e) => tracing::warn!(key, error = %e, "Skipping cache write, value not serializable"),
        }
    }
}

impl<C: CacheManager + ?Sized> CacheManagerExt for C {}

/// Backend failure, kept inside the cache implementations
#[derive(Debug, thiserror::Error)]
pub(crate) enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] ::redis::RedisError),

    #[error("cache operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Glob match with Redis semantics for `*` (any run) and `?` (one char)
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = k;
            p += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            resume += 1;
            k = resume;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("customers:*", "customers:id:42"));
        assert!(pattern_matches("customers:list:*", "customers:list:page:1:20"));
        assert!(!pattern_matches("customers:list:*", "customers:id:42"));
        assert!(!pattern_matches("customers:*", "orders:1"));
        assert!(pattern_matches("*", ""));
        assert!(pattern_matches("a?c", "abc"));
        assert!(!pattern_matches("a?c", "ac"));
        assert!(pattern_matches("*:stats", "customers:stats"));
        assert!(pattern_matches("c*s*s", "customers:stats"));
        assert!(pattern_matches("exact", "exact"));
        assert!(!pattern_matches("exact", "exactly"));
    }
}
