use async_trait::async_trait;

use crate::auth::AuthError;
use crate::domain::customer::{
    CustomerId, CustomerRecord, CustomerSearchFilter, CustomerStatistics, CustomerType, Email,
    PagedResult, QueryError, ServiceError,
};
use crate::errors::ErrorKind;
use crate::utils::IsTransient;

mod client;
mod dto;
mod keys;
mod local;
mod transport;

pub use client::{CacheTtls, CachedCustomerApiClient};
pub use dto::{CreateCustomerRequest, UpdateCustomerRequest};
pub use keys::CacheKeys;
pub use local::LocalCustomerTransport;
pub use transport::{CustomerTransport, HttpCustomerTransport, StatusAction};

// ============================================================================
// Customer API Client Contract
// ============================================================================
//
// Remote-facing facade over the customer microservice:
// - reads go through the cache, misses call out with a valid token
// - writes call out first, then invalidate what they could have staled
// - batch writes are best-effort and report per item
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Authentication(#[from] AuthError),

    #[error("Remote call {operation} timed out")]
    Timeout { operation: &'static str },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Unreadable response: {0}")]
    Decode(String),

    #[error("Circuit breaker {0} is open")]
    CircuitOpen(String),
}

impl ApiError {
    /// Classify a non-success HTTP status
    pub fn from_status(operation: &'static str, status: u16, message: String) -> Self {
        match status {
            400 => ApiError::Validation(message),
            401 => ApiError::Unauthorized(message),
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            408 | 504 => ApiError::Timeout { operation },
            409 => ApiError::Conflict(message),
            422 => ApiError::InvalidState(message),
            _ => ApiError::Server { status, message },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Conflict(_) => ErrorKind::UniqueConstraintViolation,
            ApiError::InvalidState(_) => ErrorKind::InvalidStateTransition,
            ApiError::Unauthorized(_) | ApiError::Forbidden(_) => ErrorKind::AuthenticationFailure,
            ApiError::Authentication(e) => e.kind(),
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Server { .. } | ApiError::Transport(_) | ApiError::Decode(_) => ErrorKind::RemoteFailure,
            ApiError::CircuitOpen(_) => ErrorKind::Unavailable,
        }
    }

    /// The request may have reached the remote and been applied even though
    /// no definite answer came back
    pub fn is_outcome_unknown(&self) -> bool {
        match self {
            ApiError::Timeout { .. } | ApiError::Transport(_) | ApiError::Decode(_) => true,
            ApiError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl IsTransient for ApiError {
    fn is_transient(&self) -> bool {
        match self {
            ApiError::Timeout { .. } | ApiError::Transport(_) => true,
            ApiError::Server { status, .. } => *status >= 500 || *status == 429,
            ApiError::Authentication(AuthError::Timeout { .. }) => true,
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Validation(errors.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        ApiError::Validation(error.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        let message = error.to_string();
        match error.kind() {
            ErrorKind::Validation => ApiError::Validation(message),
            ErrorKind::NotFound => ApiError::NotFound(message),
            ErrorKind::UniqueConstraintViolation | ErrorKind::ConcurrencyConflict => ApiError::Conflict(message),
            ErrorKind::InvalidStateTransition => ApiError::InvalidState(message),
            ErrorKind::Timeout => ApiError::Timeout { operation: "local" },
            _ => ApiError::Server { status: 500, message },
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub error: ApiError,
}

/// Per-item report for a best-effort batch
#[derive(Debug)]
pub struct BatchResult<T> {
    pub succeeded: Vec<(usize, T)>,
    pub failed: Vec<BatchFailure>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn push(&mut self, index: usize, result: ApiResult<T>) {
        match result {
            Ok(value) => self.succeeded.push((index, value)),
            Err(error) => self.failed.push(BatchFailure { index, error }),
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.succeeded.iter().map(|(_, value)| value)
    }
}

#[async_trait]
pub trait CustomerApiClient: Send + Sync {
    /// `None` when the customer does not exist
    async fn get_customer(&self, id: CustomerId) -> ApiResult<Option<CustomerRecord>>;

    async fn get_customer_by_email(&self, email: &Email) -> ApiResult<Option<CustomerRecord>>;

    async fn get_customers(&self, page: u32, page_size: u32) -> ApiResult<PagedResult<CustomerRecord>>;

    async fn search_customers(&self, filter: &CustomerSearchFilter) -> ApiResult<PagedResult<CustomerRecord>>;

    async fn get_customers_by_city(&self, city: &str) -> ApiResult<Vec<CustomerRecord>>;

    async fn get_customers_by_state(&self, state: &str) -> ApiResult<Vec<CustomerRecord>>;

    async fn get_customers_by_type(&self, customer_type: CustomerType) -> ApiResult<Vec<CustomerRecord>>;

    async fn get_statistics(&self) -> ApiResult<CustomerStatistics>;

    async fn create_customer(&self, request: &CreateCustomerRequest) -> ApiResult<CustomerRecord>;

    async fn update_customer(&self, id: CustomerId, request: &UpdateCustomerRequest) -> ApiResult<CustomerRecord>;

    /// Soft delete; the returned record has status `Deleted`
    async fn delete_customer(&self, id: CustomerId) -> ApiResult<CustomerRecord>;

    async fn activate_customer(&self, id: CustomerId) -> ApiResult<CustomerRecord>;

    async fn deactivate_customer(&self, id: CustomerId) -> ApiResult<CustomerRecord>;

    async fn restore_customer(&self, id: CustomerId) -> ApiResult<CustomerRecord>;

    async fn create_customers(&self, requests: &[CreateCustomerRequest]) -> BatchResult<CustomerRecord>;

    async fn update_customers(
        &self,
        updates: &[(CustomerId, UpdateCustomerRequest)],
    ) -> BatchResult<CustomerRecord>;

    async fn delete_customers(&self, ids: &[CustomerId]) -> BatchResult<CustomerRecord>;
}
