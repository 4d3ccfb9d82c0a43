use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Cache hits, misses, backend errors and invalidations
// - Remote customer API calls (outcome, latency, retries)
// - Circuit breaker state transitions
// - Token refreshes
// - Domain operations and published events
//
// `render()` produces the Prometheus text exposition format.
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Cache Metrics
    pub cache_lookups: IntCounterVec,
    pub cache_errors: IntCounterVec,
    pub cache_invalidated_keys: IntCounter,

    // Remote Call Metrics
    pub remote_calls: IntCounterVec,
    pub remote_call_duration: HistogramVec,
    pub retry_attempts_total: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
    pub circuit_breaker_transitions: IntCounterVec,

    // Auth Metrics
    pub token_refreshes: IntCounterVec,

    // Domain Metrics
    pub domain_operations: IntCounterVec,
    pub events_published: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        // Cache Metrics
        let cache_lookups = IntCounterVec::new(
            Opts::new("customer_cache_lookups_total", "Cache lookups by read operation and result"),
            &["operation", "result"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let cache_errors = IntCounterVec::new(
            Opts::new("customer_cache_errors_total", "Cache backend failures absorbed as misses"),
            &["operation"],
        )?;
        registry.register(Box::new(cache_errors.clone()))?;

        let cache_invalidated_keys = IntCounter::new(
            "customer_cache_invalidated_keys_total",
            "Cache keys removed after successful writes",
        )?;
        registry.register(Box::new(cache_invalidated_keys.clone()))?;

        // Remote Call Metrics
        let remote_calls = IntCounterVec::new(
            Opts::new("customer_api_calls_total", "Remote customer API calls"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(remote_calls.clone()))?;

        let remote_call_duration = HistogramVec::new(
            HistogramOpts::new("customer_api_call_duration_seconds", "Remote customer API call duration")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["operation"],
        )?;
        registry.register(Box::new(remote_call_duration.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("customer_api_retry_attempts_total", "Retry attempts after a transient failure"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGauge::new(
            "customer_api_circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("customer_api_circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        // Auth Metrics
        let token_refreshes = IntCounterVec::new(
            Opts::new("auth_token_refreshes_total", "Access token refreshes by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(token_refreshes.clone()))?;

        // Domain Metrics
        let domain_operations = IntCounterVec::new(
            Opts::new("customer_operations_total", "Customer operations by outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(domain_operations.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("customer_events_published_total", "Domain events handed to the publisher"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        Ok(Self {
            registry,
            cache_lookups,
            cache_errors,
            cache_invalidated_keys,
            remote_calls,
            remote_call_duration,
            retry_attempts_total,
            circuit_breaker_state,
            circuit_breaker_transitions,
            token_refreshes,
            domain_operations,
            events_published,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn record_cache_lookup(&self, operation: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups.with_label_values(&[operation, result]).inc();
    }

    pub fn record_cache_error(&self, operation: &str) {
        self.cache_errors.with_label_values(&[operation]).inc();
    }

    pub fn record_cache_invalidation(&self, keys: u64) {
        self.cache_invalidated_keys.inc_by(keys);
    }

    pub fn record_remote_call(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.remote_calls.with_label_values(&[operation, outcome]).inc();
        self.remote_call_duration.with_label_values(&[operation]).observe(duration_secs);
    }

    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total
            .with_label_values(&[operation, &attempt.to_string()])
            .inc();
    }

    pub fn update_circuit_breaker_state(&self, state: u8) {
        self.circuit_breaker_state.set(state as i64);
    }

    pub fn record_circuit_breaker_transition(&self, from_state: &str, to_state: &str) {
        self.circuit_breaker_transitions
            .with_label_values(&[from_state, to_state])
            .inc();
    }

    pub fn record_token_refresh(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.token_refreshes.with_label_values(&[outcome]).inc();
    }

    pub fn record_domain_operation(&self, operation: &str, outcome: &str) {
        self.domain_operations.with_label_values(&[operation, outcome]).inc();
    }

    pub fn record_event_published(&self, event_type: &str) {
        self.events_published.with_label_values(&[event_type]).inc();
    }
}
