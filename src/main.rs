use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use customer_management::api::{
    CachedCustomerApiClient, CreateCustomerRequest, CustomerApiClient, CustomerTransport, HttpCustomerTransport,
    LocalCustomerTransport, UpdateCustomerRequest,
};
use customer_management::auth::{
    AccessToken, AuthError, AuthenticationManager, Credentials, HttpIdentityProvider, IdentityProvider,
    RefreshToken, TokenAuthManager, TokenGrant,
};
use customer_management::cache::{CacheManager, InMemoryCacheManager, RedisCacheManager};
use customer_management::config::{AppConfig, CacheBackend};
use customer_management::domain::customer::{CustomerSearchFilter, CustomerService, CustomerType};
use customer_management::health::overall_status;
use customer_management::messaging::LoggingEventPublisher;
use customer_management::metrics::Metrics;
use customer_management::repository::InMemoryCustomerStore;

/// Stands in for the identity provider when `AUTH_URL` is unset
struct DemoIdentityProvider;

fn demo_grant() -> TokenGrant {
    TokenGrant {
        access_token: AccessToken::new(uuid::Uuid::new_v4().to_string()),
        refresh_token: Some(RefreshToken::new(uuid::Uuid::new_v4().to_string())),
        expires_in: Duration::from_secs(900),
    }
}

#[async_trait]
impl IdentityProvider for DemoIdentityProvider {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<TokenGrant, AuthError> {
        Ok(demo_grant())
    }

    async fn refresh(&self, _refresh_token: &RefreshToken) -> Result<TokenGrant, AuthError> {
        Ok(demo_grant())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=customer_management=trace cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,customer_management=debug")),
        )
        .init();

    tracing::info!("🚀 Starting customer management client");

    let config = AppConfig::from_env()?;
    tracing::debug!(?config, "Configuration loaded");

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);

    // === 2. Cache ===
    let cache: Arc<dyn CacheManager> = match config.cache.backend {
        CacheBackend::Redis => {
            let redis = RedisCacheManager::new(
                &config.cache.redis_url,
                config.cache.default_ttl,
                config.cache.operation_timeout,
            )?
            .with_metrics(metrics.clone());
            if !redis.ping().await {
                tracing::warn!("Redis not reachable, cached reads will fall through to the service");
            }
            Arc::new(redis)
        }
        CacheBackend::Memory => Arc::new(InMemoryCacheManager::new(config.cache.default_ttl)),
    };

    // === 3. Transport: remote service, or an in-process one ===
    let transport: Arc<dyn CustomerTransport> = match &config.api.base_url {
        Some(base_url) => {
            tracing::info!(base_url = %base_url, "Using remote customer service");
            Arc::new(HttpCustomerTransport::new(base_url.clone(), config.api.request_timeout)?)
        }
        None => {
            tracing::info!("CUSTOMER_API_URL not set, serving customers in-process");
            let service = CustomerService::new(
                Arc::new(InMemoryCustomerStore::new()),
                Arc::new(LoggingEventPublisher::new("customer-events")),
            )
            .with_metrics(metrics.clone());
            Arc::new(LocalCustomerTransport::new(Arc::new(service)))
        }
    };

    // === 4. Authentication ===
    let auth: Arc<dyn AuthenticationManager> = match &config.auth.identity_url {
        Some(identity_url) => Arc::new(
            TokenAuthManager::new(
                HttpIdentityProvider::new(identity_url.clone(), config.auth.timeout)?,
                config.auth.refresh_skew,
                config.auth.timeout,
            )
            .with_metrics(metrics.clone()),
        ),
        None => Arc::new(
            TokenAuthManager::new(DemoIdentityProvider, config.auth.refresh_skew, config.auth.timeout)
                .with_metrics(metrics.clone()),
        ),
    };
    auth.login(Credentials::new(config.auth.username.clone(), config.auth.password()))
        .await?;

    // === 5. Client ===
    let client = CachedCustomerApiClient::new(transport, auth.clone(), cache)
        .with_keys(config.cache.keys())
        .with_ttls(config.cache.ttls())
        .with_request_timeout(config.api.request_timeout)
        .with_retry(config.api.retry.clone())
        .with_circuit_breaker(config.api.circuit_breaker.clone())
        .with_metrics(metrics.clone());

    // === 6. Demonstrate the customer lifecycle ===
    tracing::info!("📝 Demonstrating customer lifecycle");

    let jane = client
        .create_customer(
            &CreateCustomerRequest::new("jane.doe@example.com", "Jane", "Doe", CustomerType::Individual)
                .with_phone("+1 512 555 0100")
                .with_location("Austin", "TX"),
        )
        .await?;
    tracing::info!(customer_id = %jane.id, "✅ Customer created");

    let batch = client
        .create_customers(&[
            CreateCustomerRequest::new("acme@example.com", "Acme", "Corp", CustomerType::Business)
                .with_location("Dallas", "TX"),
            CreateCustomerRequest::new("JANE.DOE@example.com", "Jane", "Again", CustomerType::Individual),
            CreateCustomerRequest::new("city@example.gov", "City", "Hall", CustomerType::Government)
                .with_location("Austin", "TX"),
        ])
        .await;
    for failure in &batch.failed {
        tracing::warn!(index = failure.index, error = %failure.error, "Batch item rejected");
    }

    // Second read is served from the cache
    client.get_customer(jane.id).await?;
    client.get_customer(jane.id).await?;

    let updated = client
        .update_customer(
            jane.id,
            &UpdateCustomerRequest::new("jane@example.com", "Jane", "Doe")
                .with_type(CustomerType::Business)
                .with_location("Austin", "TX"),
        )
        .await?;
    tracing::info!(customer_id = %updated.id, email = %updated.email, version = updated.version, "✅ Customer updated");

    client.deactivate_customer(jane.id).await?;
    client.activate_customer(jane.id).await?;
    client.delete_customer(jane.id).await?;
    client.restore_customer(jane.id).await?;

    let in_austin = client.get_customers_by_city("Austin").await?;
    let texans = client
        .search_customers(&CustomerSearchFilter::new().with_state("TX").page(1, 10))
        .await?;
    tracing::info!(austin = in_austin.len(), texas = texans.total_count, "🔎 Queries complete");

    let stats = client.get_statistics().await?;
    tracing::info!(statistics = %serde_json::to_string(&stats)?, "📊 Customer statistics");

    // === 7. Health and metrics ===
    let health = client.health().await;
    tracing::info!(
        overall = ?overall_status(&health),
        components = %serde_json::to_string(&health)?,
        "🩺 Health"
    );
    println!("{}", metrics.render()?);

    auth.logout().await;
    tracing::info!("👋 Done");
    Ok(())
}
