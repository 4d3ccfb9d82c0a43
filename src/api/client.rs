use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use validator::Validate;

use crate::auth::{AccessToken, AuthState, AuthenticationManager};
use crate::cache::{CacheManager, CacheManagerExt};
use crate::domain::customer::{
    validate_paging, CustomerId, CustomerRecord, CustomerSearchFilter, CustomerStatistics, CustomerType, Email,
    PagedResult,
};
use crate::health::{ComponentHealth, HealthStatus};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, RetryConfig};

use super::dto::{CreateCustomerRequest, UpdateCustomerRequest};
use super::keys::CacheKeys;
use super::transport::{CustomerTransport, StatusAction};
use super::{ApiError, ApiResult, BatchResult, CustomerApiClient};

/// Lifetimes of cached reads, by kind of result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheTtls {
    pub entity: Duration,
    pub list: Duration,
    pub statistics: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            entity: Duration::from_secs(300),
            list: Duration::from_secs(60),
            statistics: Duration::from_secs(120),
        }
    }
}

/// What a write may have done to the customer's email
enum PreviousEmail {
    Unchanged,
    Known(Email),
    Unknown,
}

/// `CustomerApiClient` over a transport, with read-through caching,
/// bearer tokens, retries and a circuit breaker.
///
/// Each remote attempt is: fetch token → call under timeout and breaker.
/// A 401 forces one token refresh and one more try. Transient failures
/// of reads are retried with backoff around the whole attempt; writes get
/// a single attempt.
///
/// Every invalidation bumps a generation counter. A read only populates the
/// cache if no invalidation ran while it was in flight.
pub struct CachedCustomerApiClient {
    transport: Arc<dyn CustomerTransport>,
    auth: Arc<dyn AuthenticationManager>,
    cache: Arc<dyn CacheManager>,
    keys: CacheKeys,
    ttls: CacheTtls,
    request_timeout: Duration,
    retry: RetryConfig,
    breaker: CircuitBreaker,
    generation: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl CachedCustomerApiClient {
    pub fn new(
        transport: Arc<dyn CustomerTransport>,
        auth: Arc<dyn AuthenticationManager>,
        cache: Arc<dyn CacheManager>,
    ) -> Self {
        Self {
            transport,
            auth,
            cache,
            keys: CacheKeys::default(),
            ttls: CacheTtls::default(),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            breaker: CircuitBreaker::new("customer-api", CircuitBreakerConfig::default()),
            generation: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_keys(mut self, keys: CacheKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_ttls(mut self, ttls: CacheTtls) -> Self {
        self.ttls = ttls;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        let mut breaker = CircuitBreaker::new(self.breaker.name().to_string(), config);
        if let Some(metrics) = &self.metrics {
            breaker = breaker.with_metrics(metrics.clone());
        }
        self.breaker = breaker;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.breaker = self.breaker.clone().with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.get_state().await
    }

    /// Authentication and remote-circuit health
    pub async fn health(&self) -> Vec<ComponentHealth> {
        let auth_status = match self.auth.state() {
            AuthState::Authenticated => HealthStatus::Healthy,
            AuthState::Expired => HealthStatus::Degraded("access token expired".to_string()),
            AuthState::Unauthenticated => HealthStatus::Unhealthy("no active session".to_string()),
        };
        let auth_details = match self.auth.expiration_time() {
            Some(expires_at) => format!("expires_at={}", expires_at.to_rfc3339()),
            None => "expires_at=none".to_string(),
        };

        let circuit_status = match self.breaker.get_state().await {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("circuit half open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("circuit open".to_string()),
        };
        let failures = self.breaker.get_failure_count().await;

        vec![
            ComponentHealth::new("authentication", auth_status).with_details(auth_details),
            ComponentHealth::new(self.breaker.name(), circuit_status).with_details(format!("failures={failures}")),
        ]
    }

    // ========================================================================
    // Remote execution
    // ========================================================================

    async fn execute<'a, T, F>(&'a self, operation: &'static str, call: F) -> ApiResult<T>
    where
        T: Send + 'a,
        F: Fn(AccessToken) -> BoxFuture<'a, ApiResult<T>> + Send + Sync + 'a,
    {
        self.run(operation, &self.retry, call).await
    }

    /// Single attempt: a resent write is not idempotent
    async fn execute_write<'a, T, F>(&'a self, operation: &'static str, call: F) -> ApiResult<T>
    where
        T: Send + 'a,
        F: Fn(AccessToken) -> BoxFuture<'a, ApiResult<T>> + Send + Sync + 'a,
    {
        let once = RetryConfig::disabled();
        self.run(operation, &once, call).await
    }

    async fn run<'a, T, F>(&'a self, operation: &'static str, retry: &RetryConfig, call: F) -> ApiResult<T>
    where
        T: Send + 'a,
        F: Fn(AccessToken) -> BoxFuture<'a, ApiResult<T>> + Send + Sync + 'a,
    {
        let started = Instant::now();
        let call = &call;

        let outcome = retry_on_transient(
            retry,
            operation,
            |attempt| {
                if let Some(metrics) = &self.metrics {
                    metrics.record_retry_attempt(operation, attempt);
                }
            },
            move |_| self.attempt(operation, call),
        )
        .await;
        let attempts = outcome.attempts();
        let result = outcome.into_result();

        if let Err(e) = &result {
            tracing::debug!(operation, attempts, error = %e, "Remote call failed");
        }
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => "success",
                Err(e) => e.kind().as_str(),
            };
            metrics.record_remote_call(operation, outcome, started.elapsed().as_secs_f64());
        }
        result
    }

    async fn attempt<'a, T, F>(&'a self, operation: &'static str, call: &F) -> ApiResult<T>
    where
        T: Send + 'a,
        F: Fn(AccessToken) -> BoxFuture<'a, ApiResult<T>> + Sync,
    {
        let token = self.auth.get_access_token().await?;

        match self.guarded(operation, call(token.clone())).await {
            Err(ApiError::Unauthorized(message)) => {
                tracing::warn!(operation, reason = %message, "Remote rejected access token, forcing refresh");
                let token = self.auth.refresh_if_current(&token).await?;
                self.guarded(operation, call(token)).await
            }
            other => other,
        }
    }

    async fn guarded<T>(&self, operation: &'static str, call: BoxFuture<'_, ApiResult<T>>) -> ApiResult<T> {
        let timed = async {
            match tokio::time::timeout(self.request_timeout, call).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(operation, timeout_ms = self.request_timeout.as_millis() as u64, "Remote call timed out");
                    Err(ApiError::Timeout { operation })
                }
            }
        };

        self.breaker.call(timed).await.map_err(|e| match e {
            CircuitBreakerError::CircuitOpen(name) => ApiError::CircuitOpen(name),
            CircuitBreakerError::OperationFailed(e) => e,
        })
    }

    // ========================================================================
    // Cache
    // ========================================================================

    async fn read_through<'a, T, F>(&'a self, operation: &'static str, key: String, ttl: Duration, call: F) -> ApiResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'a,
        F: Fn(AccessToken) -> BoxFuture<'a, ApiResult<T>> + Send + Sync + 'a,
    {
        if let Some(hit) = self.cache.get::<T>(&key).await {
            self.record_lookup(operation, true);
            return Ok(hit);
        }
        self.record_lookup(operation, false);

        let generation = self.generation.load(Ordering::SeqCst);
        let value = self.execute(operation, call).await?;
        self.populate(operation, &key, &value, ttl, generation).await;
        Ok(value)
    }

    /// Absent results are not cached
    async fn read_through_optional<'a, T, F>(
        &'a self,
        operation: &'static str,
        key: String,
        ttl: Duration,
        call: F,
    ) -> ApiResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'a,
        F: Fn(AccessToken) -> BoxFuture<'a, ApiResult<Option<T>>> + Send + Sync + 'a,
    {
        if let Some(hit) = self.cache.get::<T>(&key).await {
            self.record_lookup(operation, true);
            return Ok(Some(hit));
        }
        self.record_lookup(operation, false);

        let generation = self.generation.load(Ordering::SeqCst);
        let value = self.execute(operation, call).await?;
        if let Some(found) = &value {
            self.populate(operation, &key, found, ttl, generation).await;
        }
        Ok(value)
    }

    /// Store a read result fetched while `generation` was current. An
    /// invalidation can land between the check and the write, so the
    /// generation is checked again after it.
    async fn populate<T>(&self, operation: &'static str, key: &str, value: &T, ttl: Duration, generation: u64)
    where
        T: Serialize + Sync,
    {
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(operation, key, "Invalidated while reading, result not cached");
            return;
        }
        self.cache.set(key, value, Some(ttl)).await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(operation, key, "Invalidated while caching, entry dropped");
            self.cache.remove(key).await;
        }
    }

    /// Runs only after the remote write succeeded
    async fn invalidate(&self, record: &CustomerRecord, previous: PreviousEmail) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut removed = 2;
        self.cache.remove(&self.keys.customer(record.id)).await;
        self.cache.remove(&self.keys.email(&record.email)).await;

        match previous {
            PreviousEmail::Known(old) if old != record.email => {
                self.cache.remove(&self.keys.email(&old)).await;
                removed += 1;
            }
            PreviousEmail::Known(_) | PreviousEmail::Unchanged => {}
            PreviousEmail::Unknown => {
                removed += self.cache.remove_pattern(&self.keys.email_pattern()).await;
            }
        }

        removed += self.cache.remove_pattern(&self.keys.list_pattern()).await;
        self.cache.remove(&self.keys.statistics()).await;
        removed += 1;

        tracing::debug!(customer_id = %record.id, removed, "Invalidated cached customer entries");
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_invalidation(removed);
        }
    }

    /// A write failed without a definite answer and may have been applied.
    /// Everything it could have touched is dropped.
    async fn invalidate_unsettled(&self, operation: &'static str, id: Option<CustomerId>, error: &ApiError) {
        if !error.is_outcome_unknown() {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut removed = 0;
        if let Some(id) = id {
            self.cache.remove(&self.keys.customer(id)).await;
            removed += 1;
        }
        removed += self.cache.remove_pattern(&self.keys.email_pattern()).await;
        removed += self.cache.remove_pattern(&self.keys.list_pattern()).await;
        self.cache.remove(&self.keys.statistics()).await;
        removed += 1;

        tracing::warn!(operation, error = %error, removed, "Write outcome unknown, dropped cached customer entries");
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_invalidation(removed);
        }
    }

    fn record_lookup(&self, operation: &'static str, hit: bool) {
        tracing::trace!(operation, hit, "Cache lookup");
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(operation, hit);
        }
    }

    async fn transition(&self, operation: &'static str, id: CustomerId, action: StatusAction) -> ApiResult<CustomerRecord> {
        let record = match self
            .execute_write(operation, |token| self.transport.transition(token, id, action))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.invalidate_unsettled(operation, Some(id), &e).await;
                return Err(e);
            }
        };

        tracing::info!(customer_id = %id, action = action.as_str(), status = %record.status, "Customer status changed");
        self.invalidate(&record, PreviousEmail::Unchanged).await;
        Ok(record)
    }
}

fn log_batch<T>(operation: &'static str, batch: &BatchResult<T>) {
    if batch.is_complete_success() {
        tracing::info!(operation, succeeded = batch.success_count(), "Batch completed");
    } else {
        tracing::warn!(
            operation,
            succeeded = batch.success_count(),
            failed = batch.failure_count(),
            "Batch completed with failures"
        );
    }
}

#[async_trait]
impl CustomerApiClient for CachedCustomerApiClient {
    async fn get_customer(&self, id: CustomerId) -> ApiResult<Option<CustomerRecord>> {
        let key = self.keys.customer(id);
        self.read_through_optional("get_customer", key, self.ttls.entity, |token| {
            self.transport.get_customer(token, id)
        })
        .await
    }

    async fn get_customer_by_email(&self, email: &Email) -> ApiResult<Option<CustomerRecord>> {
        let key = self.keys.email(email);
        self.read_through_optional("get_customer_by_email", key, self.ttls.entity, |token| {
            self.transport.get_customer_by_email(token, email)
        })
        .await
    }

    async fn get_customers(&self, page: u32, page_size: u32) -> ApiResult<PagedResult<CustomerRecord>> {
        validate_paging(page, page_size)?;

        let filter = CustomerSearchFilter::new().page(page, page_size);
        let key = self.keys.page(page, page_size);
        self.read_through("get_customers", key, self.ttls.list, |token| {
            self.transport.list_customers(token, &filter)
        })
        .await
    }

    async fn search_customers(&self, filter: &CustomerSearchFilter) -> ApiResult<PagedResult<CustomerRecord>> {
        filter.validate()?;

        let key = self.keys.search(filter);
        self.read_through("search_customers", key, self.ttls.list, |token| {
            self.transport.list_customers(token, filter)
        })
        .await
    }

    async fn get_customers_by_city(&self, city: &str) -> ApiResult<Vec<CustomerRecord>> {
        let key = self.keys.city(city);
        self.read_through("get_customers_by_city", key, self.ttls.list, |token| {
            self.transport.customers_by_city(token, city)
        })
        .await
    }

    async fn get_customers_by_state(&self, state: &str) -> ApiResult<Vec<CustomerRecord>> {
        let key = self.keys.state(state);
        self.read_through("get_customers_by_state", key, self.ttls.list, |token| {
            self.transport.customers_by_state(token, state)
        })
        .await
    }

    async fn get_customers_by_type(&self, customer_type: CustomerType) -> ApiResult<Vec<CustomerRecord>> {
        let key = self.keys.customer_type(customer_type);
        self.read_through("get_customers_by_type", key, self.ttls.list, |token| {
            self.transport.customers_by_type(token, customer_type)
        })
        .await
    }

    async fn get_statistics(&self) -> ApiResult<CustomerStatistics> {
        let key = self.keys.statistics();
        self.read_through("get_statistics", key, self.ttls.statistics, |token| {
            self.transport.statistics(token)
        })
        .await
    }

    async fn create_customer(&self, request: &CreateCustomerRequest) -> ApiResult<CustomerRecord> {
        request.validate()?;

        let record = match self
            .execute_write("create_customer", |token| self.transport.create(token, request))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.invalidate_unsettled("create_customer", None, &e).await;
                return Err(e);
            }
        };

        tracing::info!(customer_id = %record.id, email = %record.email, name = %record.full_name(), "Customer created");
        self.invalidate(&record, PreviousEmail::Unchanged).await;
        Ok(record)
    }

    async fn update_customer(&self, id: CustomerId, request: &UpdateCustomerRequest) -> ApiResult<CustomerRecord> {
        request.validate()?;

        // Read before the write; the cached entry is the only place the old email is known
        let previous = match self.cache.get::<CustomerRecord>(&self.keys.customer(id)).await {
            Some(cached) => PreviousEmail::Known(cached.email),
            None => PreviousEmail::Unknown,
        };

        let record = match self
            .execute_write("update_customer", |token| self.transport.update(token, id, request))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.invalidate_unsettled("update_customer", Some(id), &e).await;
                return Err(e);
            }
        };

        tracing::info!(customer_id = %id, version = record.version, "Customer updated");
        self.invalidate(&record, previous).await;
        Ok(record)
    }

    async fn delete_customer(&self, id: CustomerId) -> ApiResult<CustomerRecord> {
        self.transition("delete_customer", id, StatusAction::Delete).await
    }

    async fn activate_customer(&self, id: CustomerId) -> ApiResult<CustomerRecord> {
        self.transition("activate_customer", id, StatusAction::Activate).await
    }

    async fn deactivate_customer(&self, id: CustomerId) -> ApiResult<CustomerRecord> {
        self.transition("deactivate_customer", id, StatusAction::Deactivate).await
    }

    async fn restore_customer(&self, id: CustomerId) -> ApiResult<CustomerRecord> {
        self.transition("restore_customer", id, StatusAction::Restore).await
    }

    async fn create_customers(&self, requests: &[CreateCustomerRequest]) -> BatchResult<CustomerRecord> {
        let mut batch = BatchResult::default();
        for (index, request) in requests.iter().enumerate() {
            batch.push(index, self.create_customer(request).await);
        }
        log_batch("create_customers", &batch);
        batch
    }

    async fn update_customers(
        &self,
        updates: &[(CustomerId, UpdateCustomerRequest)],
    ) -> BatchResult<CustomerRecord> {
        let mut batch = BatchResult::default();
        for (index, (id, request)) in updates.iter().enumerate() {
            batch.push(index, self.update_customer(*id, request).await);
        }
        log_batch("update_customers", &batch);
        batch
    }

    async fn delete_customers(&self, ids: &[CustomerId]) -> BatchResult<CustomerRecord> {
        let mut batch = BatchResult::default();
        for (index, id) in ids.iter().enumerate() {
            batch.push(index, self.delete_customer(*id).await);
        }
        log_batch("delete_customers", &batch);
        batch
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LocalCustomerTransport;
    use crate::auth::{AuthError, Credentials, IdentityProvider, RefreshToken, TokenAuthManager, TokenGrant};
    use crate::cache::InMemoryCacheManager;
    use crate::domain::customer::{CustomerService, CustomerStatus};
    use crate::errors::ErrorKind;
    use crate::messaging::InMemoryEventPublisher;
    use crate::repository::InMemoryCustomerStore;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    // ------------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct ProviderState {
        refreshes: AtomicUsize,
        fail_refresh: AtomicBool,
    }

    struct StaticProvider(Arc<ProviderState>);

    fn grant(token: String) -> TokenGrant {
        TokenGrant {
            access_token: AccessToken::new(token),
            refresh_token: Some(RefreshToken::new("refresh")),
            expires_in: Duration::from_secs(3600),
        }
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn authenticate(&self, _credentials: &Credentials) -> Result<TokenGrant, AuthError> {
            Ok(grant("initial".to_string()))
        }

        async fn refresh(&self, _refresh_token: &RefreshToken) -> Result<TokenGrant, AuthError> {
            if self.0.fail_refresh.load(Ordering::SeqCst) {
                return Err(AuthError::Provider("refresh token revoked".to_string()));
            }
            let n = self.0.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(grant(format!("refreshed-{n}")))
        }
    }

    #[derive(Default)]
    struct Faults {
        transient: AtomicU32,
        unauthorized: AtomicU32,
        delay_ms: AtomicU64,
        /// One-shot pause after a city list has been read
        read_stall_ms: AtomicU64,
        /// One-shot pause after a create has been applied
        reply_stall_ms: AtomicU64,
        calls: AtomicUsize,
    }

    fn take(counter: &AtomicU32) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }

    async fn stall(once_ms: &AtomicU64) {
        let ms = once_ms.swap(0, Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Local transport with injectable failures; optionally records whether a key was cached during an update
    struct FlakyTransport {
        inner: LocalCustomerTransport,
        faults: Arc<Faults>,
        watched_key: Mutex<Option<(Arc<InMemoryCacheManager>, String)>>,
        cached_during_write: AtomicBool,
    }

    impl FlakyTransport {
        async fn gate(&self) -> ApiResult<()> {
            self.faults.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.faults.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if take(&self.faults.unauthorized) {
                return Err(ApiError::Unauthorized("token rejected".to_string()));
            }
            if take(&self.faults.transient) {
                return Err(ApiError::Transport("connection reset".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CustomerTransport for FlakyTransport {
        async fn get_customer(&self, token: AccessToken, id: CustomerId) -> ApiResult<Option<CustomerRecord>> {
            self.gate().await?;
            self.inner.get_customer(token, id).await
        }

        async fn get_customer_by_email(&self, token: AccessToken, email: &Email) -> ApiResult<Option<CustomerRecord>> {
            self.gate().await?;
            self.inner.get_customer_by_email(token, email).await
        }

        async fn list_customers(
            &self,
            token: AccessToken,
            filter: &CustomerSearchFilter,
        ) -> ApiResult<PagedResult<CustomerRecord>> {
            self.gate().await?;
            self.inner.list_customers(token, filter).await
        }

        async fn customers_by_city(&self, token: AccessToken, city: &str) -> ApiResult<Vec<CustomerRecord>> {
            self.gate().await?;
            let listed = self.inner.customers_by_city(token, city).await;
            stall(&self.faults.read_stall_ms).await;
            listed
        }

        async fn customers_by_state(&self, token: AccessToken, state: &str) -> ApiResult<Vec<CustomerRecord>> {
            self.gate().await?;
            self.inner.customers_by_state(token, state).await
        }

        async fn customers_by_type(
            &self,
            token: AccessToken,
            customer_type: CustomerType,
        ) -> ApiResult<Vec<CustomerRecord>> {
            self.gate().await?;
            self.inner.customers_by_type(token, customer_type).await
        }

        async fn statistics(&self, token: AccessToken) -> ApiResult<CustomerStatistics> {
            self.gate().await?;
            self.inner.statistics(token).await
        }

        async fn create(&self, token: AccessToken, request: &CreateCustomerRequest) -> ApiResult<CustomerRecord> {
            self.gate().await?;
            let created = self.inner.create(token, request).await;
            stall(&self.faults.reply_stall_ms).await;
            created
        }

        async fn update(
            &self,
            token: AccessToken,
            id: CustomerId,
            request: &UpdateCustomerRequest,
        ) -> ApiResult<CustomerRecord> {
            self.gate().await?;
            let watched_key = self.watched_key.lock().unwrap().clone();
            if let Some((cache, key)) = watched_key {
                self.cached_during_write.store(cache.exists(&key).await, Ordering::SeqCst);
            }
            self.inner.update(token, id, request).await
        }

        async fn transition(
            &self,
            token: AccessToken,
            id: CustomerId,
            action: StatusAction,
        ) -> ApiResult<CustomerRecord> {
            self.gate().await?;
            self.inner.transition(token, id, action).await
        }
    }

    struct Harness {
        client: CachedCustomerApiClient,
        cache: Arc<InMemoryCacheManager>,
        transport: Arc<FlakyTransport>,
        faults: Arc<Faults>,
        provider: Arc<ProviderState>,
        auth: Arc<TokenAuthManager<StaticProvider>>,
        keys: CacheKeys,
    }

    impl Harness {
        fn calls(&self) -> usize {
            self.faults.calls.load(Ordering::SeqCst)
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    async fn harness_with(retry: RetryConfig, breaker: CircuitBreakerConfig) -> Harness {
        let store = InMemoryCustomerStore::new();
        let service = Arc::new(CustomerService::new(
            Arc::new(store),
            Arc::new(InMemoryEventPublisher::new()),
        ));

        let faults = Arc::new(Faults::default());
        let transport = Arc::new(FlakyTransport {
            inner: LocalCustomerTransport::new(service),
            faults: faults.clone(),
            watched_key: Mutex::new(None),
            cached_during_write: AtomicBool::new(false),
        });

        let provider = Arc::new(ProviderState::default());
        let auth = Arc::new(TokenAuthManager::new(
            StaticProvider(provider.clone()),
            Duration::ZERO,
            Duration::from_secs(1),
        ));
        auth.login(Credentials::new("svc-crm", "secret")).await.unwrap();

        let cache = Arc::new(InMemoryCacheManager::default());
        let keys = CacheKeys::new("test");
        let client = CachedCustomerApiClient::new(transport.clone(), auth.clone(), cache.clone())
            .with_keys(keys.clone())
            .with_retry(retry)
            .with_circuit_breaker(breaker)
            .with_request_timeout(Duration::from_millis(200))
            .with_metrics(Arc::new(Metrics::new().unwrap()));

        Harness {
            client,
            cache,
            transport,
            faults,
            provider,
            auth,
            keys,
        }
    }

    async fn harness() -> Harness {
        harness_with(fast_retry(), CircuitBreakerConfig::default()).await
    }

    fn create_request(email: &str) -> CreateCustomerRequest {
        CreateCustomerRequest::new(email, "Jane", "Doe", CustomerType::Individual).with_location("Austin", "TX")
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_reads_are_served_from_cache_after_first_call() {
        let h = harness().await;
        let created = h.client.create_customer(&create_request("jane@example.com")).await.unwrap();
        let before = h.calls();

        let first = h.client.get_customer(created.id).await.unwrap().unwrap();
        let second = h.client.get_customer(created.id).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(h.calls(), before + 1);
        assert!(h.cache.exists(&h.keys.customer(created.id)).await);
    }

    #[tokio::test]
    async fn test_missing_customer_is_not_cached() {
        let h = harness().await;
        let id = CustomerId::new();

        assert!(h.client.get_customer(id).await.unwrap().is_none());
        assert!(h.client.get_customer(id).await.unwrap().is_none());

        assert_eq!(h.calls(), 2);
        assert!(!h.cache.exists(&h.keys.customer(id)).await);
    }

    #[tokio::test]
    async fn test_list_and_lookup_reads() {
        let h = harness().await;
        h.client.create_customer(&create_request("a@example.com")).await.unwrap();
        h.client
            .create_customer(&CreateCustomerRequest::new("b@example.com", "Bob", "Roe", CustomerType::Business))
            .await
            .unwrap();

        let page = h.client.get_customers(1, 1).await.unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.items.len(), 1);
        assert!(page.has_next_page());

        assert_eq!(h.client.get_customers_by_city("austin").await.unwrap().len(), 1);
        assert_eq!(h.client.get_customers_by_state("TX").await.unwrap().len(), 1);
        assert_eq!(h.client.get_customers_by_type(CustomerType::Business).await.unwrap().len(), 1);

        let email = Email::parse("B@example.com").unwrap();
        let found = h.client.get_customer_by_email(&email).await.unwrap().unwrap();
        assert_eq!(found.first_name, "Bob");

        let stats = h.client.get_statistics().await.unwrap();
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn test_bad_paging_is_rejected_before_calling_out() {
        let h = harness().await;

        let err = h.client.get_customers(0, 20).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = h
            .client
            .search_customers(&CustomerSearchFilter::new().page(1, 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.calls(), 0);
    }

    // ------------------------------------------------------------------------
    // Writes and invalidation
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_update_invalidates_after_remote_success() {
        let h = harness().await;
        let created = h.client.create_customer(&create_request("old@example.com")).await.unwrap();
        let old_email = created.email.clone();

        h.client.get_customer(created.id).await.unwrap();
        h.client.get_customer_by_email(&old_email).await.unwrap();
        h.client.get_customers(1, 20).await.unwrap();
        h.client.get_statistics().await.unwrap();

        *h.transport.watched_key.lock().unwrap() = Some((h.cache.clone(), h.keys.customer(created.id)));

        let request = UpdateCustomerRequest::new("new@example.com", "Jane", "Doe").with_type(CustomerType::Business);
        let updated = h.client.update_customer(created.id, &request).await.unwrap();

        assert!(h.transport.cached_during_write.load(Ordering::SeqCst));
        assert!(!h.cache.exists(&h.keys.customer(created.id)).await);
        assert!(!h.cache.exists(&h.keys.email(&old_email)).await);
        assert!(!h.cache.exists(&h.keys.page(1, 20)).await);
        assert!(!h.cache.exists(&h.keys.statistics()).await);

        assert_eq!(updated.customer_type, CustomerType::Business);
        let fresh = h.client.get_customer(created.id).await.unwrap().unwrap();
        assert_eq!(fresh.email.as_str(), "new@example.com");
        assert!(h.client.get_customer_by_email(&old_email).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_created_customer_appears_in_city_list() {
        let h = harness().await;
        h.client.create_customer(&create_request("first@example.com")).await.unwrap();
        assert_eq!(h.client.get_customers_by_city("Austin").await.unwrap().len(), 1);
        assert!(h.cache.exists(&h.keys.city("Austin")).await);

        h.client.create_customer(&create_request("second@example.com")).await.unwrap();

        assert!(!h.cache.exists(&h.keys.city("Austin")).await);
        assert_eq!(h.client.get_customers_by_city("Austin").await.unwrap().len(), 2);
        assert_eq!(h.client.get_customers_by_city("AUSTIN").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_read_racing_a_write_does_not_cache_stale_list() {
        let h = harness().await;
        h.client.create_customer(&create_request("first@example.com")).await.unwrap();
        h.faults.read_stall_ms.store(80, Ordering::SeqCst);

        let reader = h.client.get_customers_by_city("Austin");
        let writer = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.client.create_customer(&create_request("second@example.com")).await
        };
        let (before_write, created) = tokio::join!(reader, writer);

        assert_eq!(before_write.unwrap().len(), 1);
        created.unwrap();
        assert!(!h.cache.exists(&h.keys.city("Austin")).await);
        assert_eq!(h.client.get_customers_by_city("Austin").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_write_with_lost_reply_is_sent_once_and_drops_lists() {
        let h = harness().await;
        h.client.create_customer(&create_request("first@example.com")).await.unwrap();
        h.client.get_customers_by_city("Austin").await.unwrap();
        h.client.get_statistics().await.unwrap();
        let before = h.calls();
        h.faults.reply_stall_ms.store(500, Ordering::SeqCst);

        let err = h.client.create_customer(&create_request("second@example.com")).await.unwrap_err();

        assert!(matches!(err, ApiError::Timeout { operation: "create_customer" }));
        assert_eq!(h.calls(), before + 1);
        assert!(!h.cache.exists(&h.keys.city("Austin")).await);
        assert!(!h.cache.exists(&h.keys.statistics()).await);
        assert_eq!(h.client.get_customers_by_city("Austin").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_not_retried() {
        let h = harness().await;
        let id = h.client.create_customer(&create_request("once@example.com")).await.unwrap().id;
        h.client.get_customer(id).await.unwrap();
        let before = h.calls();
        h.faults.transient.store(1, Ordering::SeqCst);

        let err = h.client.deactivate_customer(id).await.unwrap_err();

        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(h.calls(), before + 1);
        assert!(!h.cache.exists(&h.keys.customer(id)).await);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_cache() {
        let h = harness().await;
        h.client.create_customer(&create_request("taken@example.com")).await.unwrap();
        let mine = h.client.create_customer(&create_request("mine@example.com")).await.unwrap();

        h.client.get_customer(mine.id).await.unwrap();
        h.client.get_customers(1, 20).await.unwrap();

        let request = UpdateCustomerRequest::new("taken@example.com", "Jane", "Doe");
        let err = h.client.update_customer(mine.id, &request).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UniqueConstraintViolation);
        assert!(h.cache.exists(&h.keys.customer(mine.id)).await);
        assert!(h.cache.exists(&h.keys.page(1, 20)).await);
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_remote() {
        let h = harness().await;

        let err = h.client.create_customer(&create_request("not-an-email")).await.unwrap_err();

        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let h = harness().await;
        let id = h.client.create_customer(&create_request("flow@example.com")).await.unwrap().id;
        h.client.get_statistics().await.unwrap();

        assert_eq!(h.client.deactivate_customer(id).await.unwrap().status, CustomerStatus::Inactive);
        assert!(!h.cache.exists(&h.keys.statistics()).await);
        assert_eq!(h.client.activate_customer(id).await.unwrap().status, CustomerStatus::Active);

        let err = h.client.activate_customer(id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);

        assert_eq!(h.client.delete_customer(id).await.unwrap().status, CustomerStatus::Deleted);
        assert_eq!(h.client.get_statistics().await.unwrap().deleted, 1);
        assert_eq!(h.client.restore_customer(id).await.unwrap().status, CustomerStatus::Active);
    }

    // ------------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_batch_create_reports_partial_failure() {
        let h = harness().await;
        let requests = vec![
            create_request("first@example.com"),
            create_request("FIRST@example.com"),
            create_request("broken"),
            create_request("second@example.com"),
        ];

        let batch = h.client.create_customers(&requests).await;

        assert_eq!(batch.success_count(), 2);
        assert_eq!(batch.succeeded[0].0, 0);
        assert_eq!(batch.succeeded[1].0, 3);
        assert_eq!(batch.failed[0].index, 1);
        assert_eq!(batch.failed[0].error.kind(), ErrorKind::UniqueConstraintViolation);
        assert_eq!(batch.failed[1].index, 2);
        assert_eq!(batch.failed[1].error.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_batch_update_and_delete() {
        let h = harness().await;
        let a = h.client.create_customer(&create_request("a@example.com")).await.unwrap();
        let b = h.client.create_customer(&create_request("b@example.com")).await.unwrap();

        let updates = vec![
            (a.id, UpdateCustomerRequest::new("a2@example.com", "Ann", "Doe")),
            (b.id, UpdateCustomerRequest::new("a2@example.com", "Bea", "Doe")),
        ];
        let updated = h.client.update_customers(&updates).await;
        assert_eq!(updated.success_count(), 1);
        assert_eq!(updated.failed[0].index, 1);

        let deleted = h.client.delete_customers(&[a.id, CustomerId::new(), b.id]).await;
        assert_eq!(deleted.success_count(), 2);
        assert_eq!(deleted.failed[0].index, 1);
        assert_eq!(deleted.failed[0].error.kind(), ErrorKind::NotFound);
        assert!(deleted.values().all(|r| r.status == CustomerStatus::Deleted));
    }

    // ------------------------------------------------------------------------
    // Resilience
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let h = harness().await;
        let id = h.client.create_customer(&create_request("retry@example.com")).await.unwrap().id;
        let before = h.calls();
        h.faults.transient.store(2, Ordering::SeqCst);

        let found = h.client.get_customer(id).await.unwrap();

        assert!(found.is_some());
        assert_eq!(h.calls(), before + 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surface_last_error() {
        let h = harness().await;
        h.faults.transient.store(10, Ordering::SeqCst);

        let err = h.client.get_statistics().await.unwrap_err();

        assert!(matches!(err, ApiError::Transport(_)));
        assert_eq!(h.calls(), 3);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_rejects_without_calling_out() {
        let breaker = CircuitBreakerConfig {
            failure_threshold: 2,
            open_duration: Duration::from_secs(60),
            success_threshold: 1,
        };
        let h = harness_with(RetryConfig::disabled(), breaker).await;
        h.faults.transient.store(10, Ordering::SeqCst);

        for _ in 0..2 {
            assert!(h.client.get_statistics().await.is_err());
        }
        let err = h.client.get_statistics().await.unwrap_err();

        assert!(matches!(err, ApiError::CircuitOpen(_)));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(h.calls(), 2);
        assert_eq!(h.client.circuit_state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_slow_remote_times_out() {
        let h = harness_with(RetryConfig::disabled(), CircuitBreakerConfig::default()).await;
        h.faults.delay_ms.store(500, Ordering::SeqCst);

        let err = h.client.get_customer(CustomerId::new()).await.unwrap_err();

        assert!(matches!(err, ApiError::Timeout { operation: "get_customer" }));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    // ------------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_unauthorized_forces_one_refresh_and_retries() {
        let h = harness().await;
        h.faults.unauthorized.store(1, Ordering::SeqCst);

        let stats = h.client.get_statistics().await.unwrap();

        assert_eq!(stats.total, 0);
        assert_eq!(h.provider.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_unauthorized_calls_share_one_refresh() {
        let h = harness().await;
        h.faults.delay_ms.store(30, Ordering::SeqCst);
        h.faults.unauthorized.store(2, Ordering::SeqCst);

        let (by_city, by_state) = tokio::join!(
            h.client.get_customers_by_city("Austin"),
            h.client.get_customers_by_state("TX")
        );

        assert!(by_city.is_ok());
        assert!(by_state.is_ok());
        assert_eq!(h.provider.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(h.calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_refresh_fails_call() {
        let h = harness().await;
        h.provider.fail_refresh.store(true, Ordering::SeqCst);
        h.faults.unauthorized.store(1, Ordering::SeqCst);

        let err = h.client.get_statistics().await.unwrap_err();

        assert!(matches!(err, ApiError::Authentication(AuthError::RefreshFailed(_))));
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
        assert!(!h.auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_logged_out_client_does_not_call_out() {
        let h = harness().await;
        h.auth.logout().await;

        let err = h.client.get_customer(CustomerId::new()).await.unwrap_err();

        assert!(matches!(err, ApiError::Authentication(AuthError::NotAuthenticated)));
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn test_health_reports_auth_and_circuit() {
        let h = harness().await;

        let health = h.client.health().await;
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|c| c.status.is_healthy()));

        h.auth.logout().await;
        let health = h.client.health().await;
        assert_eq!(health[0].name, "authentication");
        assert!(matches!(health[0].status, HealthStatus::Unhealthy(_)));
        assert!(health[1].status.is_healthy());
    }
}
