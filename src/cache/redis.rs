use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheError, CacheManager};
use crate::metrics::Metrics;

const SCAN_BATCH: u32 = 200;

// ============================================================================
// Redis Cache Manager
// ============================================================================
//
// - JSON strings stored with SET EX
// - Pattern removal walks SCAN MATCH cursors and deletes each batch
// - Every operation runs under a timeout; failures degrade to a miss
//
// ============================================================================

pub struct RedisCacheManager {
    client: Client,
    default_ttl: Duration,
    op_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl RedisCacheManager {
    /// Only validates the URL; connections are opened per operation
    pub fn new(redis_url: &str, default_ttl: Duration, op_timeout: Duration) -> RedisResult<Self> {
        let client = Client::open(redis_url)?;
        tracing::info!(default_ttl = ?default_ttl, op_timeout = ?op_timeout, "Redis cache configured");

        Ok(Self {
            client,
            default_ttl,
            op_timeout,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// PING the server, for startup diagnostics
    pub async fn ping(&self) -> bool {
        let result = self
            .run("ping", |mut conn| async move {
                redis::cmd("PING").query_async::<String>(&mut conn).await
            })
            .await;
        self.absorb("ping", "-", result).is_some()
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, command: F) -> Result<T, CacheError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
    {
        let work = async {
            let conn = self.client.get_multiplexed_async_connection().await?;
            command(conn).await
        };

        match tokio::time::timeout(self.op_timeout, work).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout {
                operation,
                timeout: self.op_timeout,
            }),
        }
    }

    fn absorb<T>(&self, operation: &'static str, key: &str, result: Result<T, CacheError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(operation, key, error = %e, "Redis cache operation failed, treating as miss");
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_error(operation);
                }
                None
            }
        }
    }
}

#[async_trait]
impl CacheManager for RedisCacheManager {
    async fn get_raw(&self, key: &str) -> Option<String> {
        let result = self
            .run("get", |mut conn| async move { conn.get::<_, Option<String>>(key).await })
            .await;
        self.absorb("get", key, result).flatten()
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) {
        let seconds = ttl.unwrap_or(self.default_ttl).as_secs().max(1);
        let result = self
            .run("set", |mut conn| async move {
                let _: () = conn.set_ex(key, value, seconds).await?;
                Ok(())
            })
            .await;
        self.absorb("set", key, result);
    }

    async fn remove(&self, key: &str) {
        let result = self
            .run("del", |mut conn| async move { conn.del::<_, u64>(key).await })
            .await;
        self.absorb("del", key, result);
    }

    async fn remove_pattern(&self, pattern: &str) -> u64 {
        let result = self
            .run("remove_pattern", |mut conn| async move {
                let mut cursor: u64 = 0;
                let mut removed: u64 = 0;

                loop {
                    let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;

                    if !keys.is_empty() {
                        removed += conn.del::<_, u64>(&keys).await?;
                    }
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }

                Ok(removed)
            })
            .await;

        let removed = self.absorb("remove_pattern", pattern, result).unwrap_or(0);
        tracing::debug!(pattern, removed, "Removed Redis keys by pattern");
        removed
    }

    async fn exists(&self, key: &str) -> bool {
        let result = self
            .run("exists", |mut conn| async move { conn.exists::<_, bool>(key).await })
            .await;
        self.absorb("exists", key, result).unwrap_or(false)
    }
}
