use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::api::{CacheKeys, CacheTtls};
use crate::utils::{CircuitBreakerConfig, RetryConfig};

// ============================================================================
// Application Configuration
// ============================================================================
//
// Read from the environment (a `.env` file is loaded first when present).
// Unset variables fall back to the section defaults; a variable that is set
// but unparsable is an error.
//
//   CUSTOMER_API_URL              remote customer service; unset = in-process
//   CUSTOMER_API_TIMEOUT_MS       per-attempt timeout
//   CUSTOMER_API_RETRY_ATTEMPTS   CUSTOMER_API_RETRY_INITIAL_MS   CUSTOMER_API_RETRY_MAX_MS
//   CUSTOMER_API_CB_FAILURES      CUSTOMER_API_CB_OPEN_SECS      CUSTOMER_API_CB_SUCCESSES
//   CACHE_BACKEND                 memory | redis
//   REDIS_URL   CACHE_KEY_PREFIX   CACHE_DEFAULT_TTL_SECS   CACHE_ENTITY_TTL_SECS
//   CACHE_LIST_TTL_SECS   CACHE_STATS_TTL_SECS   CACHE_OP_TIMEOUT_MS
//   AUTH_URL   AUTH_USERNAME   AUTH_PASSWORD   AUTH_REFRESH_SKEW_SECS   AUTH_TIMEOUT_MS
//
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }

        Ok(Self {
            api: ApiConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            auth: AuthConfig::from_env()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ApiConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            base_url: optional("CUSTOMER_API_URL"),
            request_timeout: millis("CUSTOMER_API_TIMEOUT_MS", defaults.request_timeout)?,
            retry: RetryConfig {
                max_attempts: parsed("CUSTOMER_API_RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
                initial_delay: millis("CUSTOMER_API_RETRY_INITIAL_MS", defaults.retry.initial_delay)?,
                max_delay: millis("CUSTOMER_API_RETRY_MAX_MS", defaults.retry.max_delay)?,
                multiplier: defaults.retry.multiplier,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CUSTOMER_API_CB_FAILURES", defaults.circuit_breaker.failure_threshold)?,
                open_duration: secs("CUSTOMER_API_CB_OPEN_SECS", defaults.circuit_breaker.open_duration)?,
                success_threshold: parsed("CUSTOMER_API_CB_SUCCESSES", defaults.circuit_breaker.success_threshold)?,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis,
}

impl FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "redis" => Ok(CacheBackend::Redis),
            other => anyhow::bail!("unknown cache backend '{other}', expected memory or redis"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub key_prefix: String,
    pub default_ttl: Duration,
    pub entity_ttl: Duration,
    pub list_ttl: Duration,
    pub statistics_ttl: Duration,
    pub operation_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let ttls = CacheTtls::default();
        Self {
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "customers".to_string(),
            default_ttl: Duration::from_secs(300),
            entity_ttl: ttls.entity,
            list_ttl: ttls.list,
            statistics_ttl: ttls.statistics,
            operation_timeout: Duration::from_millis(500),
        }
    }
}

impl CacheConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            backend: parsed("CACHE_BACKEND", defaults.backend)?,
            redis_url: optional("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: optional("CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            default_ttl: secs("CACHE_DEFAULT_TTL_SECS", defaults.default_ttl)?,
            entity_ttl: secs("CACHE_ENTITY_TTL_SECS", defaults.entity_ttl)?,
            list_ttl: secs("CACHE_LIST_TTL_SECS", defaults.list_ttl)?,
            statistics_ttl: secs("CACHE_STATS_TTL_SECS", defaults.statistics_ttl)?,
            operation_timeout: millis("CACHE_OP_TIMEOUT_MS", defaults.operation_timeout)?,
        })
    }

    pub fn keys(&self) -> CacheKeys {
        CacheKeys::new(self.key_prefix.clone())
    }

    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            entity: self.entity_ttl,
            list: self.list_ttl,
            statistics: self.statistics_ttl,
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct AuthConfig {
    pub identity_url: Option<String>,
    pub username: String,
    password: String,
    pub refresh_skew: Duration,
    pub timeout: Duration,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("identity_url", &self.identity_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("refresh_skew", &self.refresh_skew)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_url: None,
            username: "customer-client".to_string(),
            password: String::new(),
            refresh_skew: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

impl AuthConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            identity_url: optional("AUTH_URL"),
            username: optional("AUTH_USERNAME").unwrap_or(defaults.username),
            password: optional("AUTH_PASSWORD").unwrap_or(defaults.password),
            refresh_skew: secs("AUTH_REFRESH_SKEW_SECS", defaults.refresh_skew)?,
            timeout: millis("AUTH_TIMEOUT_MS", defaults.timeout)?,
        })
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

// ----------------------------------------------------------------------------
// Environment helpers
// ----------------------------------------------------------------------------

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {name}: '{raw}'")),
    }
}

fn secs(name: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_secs(parsed(name, default.as_secs())?))
}

fn millis(name: &str, default: Duration) -> Result<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Ok(Duration::from_millis(parsed(name, default_ms)?))
}
