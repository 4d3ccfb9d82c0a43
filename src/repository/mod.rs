use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::customer::{
    Customer, CustomerId, CustomerSearchFilter, CustomerStatistics, CustomerStatus, CustomerType,
    Email, PagedResult, QueryError,
};
use crate::errors::ErrorKind;

mod memory;

pub use memory::{InMemoryCustomerRepository, InMemoryCustomerStore};

// ============================================================================
// Customer Repository - persistence contract
// ============================================================================
//
// An instance is one unit of work. Reads always go to committed storage;
// `add`, `update` and `delete` only stage changes, and nothing becomes
// durable until `save_changes`, which applies all staged changes in order
// or none of them.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepositoryError {
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Customer not found: {0}")]
    NotFound(CustomerId),

    #[error("Email {0} is already used by another customer")]
    DuplicateEmail(Email),

    #[error("Customer already exists: {0}")]
    DuplicateId(CustomerId),

    #[error("Concurrency conflict on customer {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        id: CustomerId,
        expected: i64,
        actual: i64,
    },

    #[error("Storage failure during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("Storage operation {operation} timed out")]
    Timeout { operation: &'static str },
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::InvalidQuery(_) | RepositoryError::Validation(_) => ErrorKind::Validation,
            RepositoryError::NotFound(_) => ErrorKind::NotFound,
            RepositoryError::DuplicateEmail(_) | RepositoryError::DuplicateId(_) => {
                ErrorKind::UniqueConstraintViolation
            }
            RepositoryError::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            RepositoryError::Storage { .. } => ErrorKind::StorageFailure,
            RepositoryError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Includes soft-deleted customers
    async fn get_by_id(&self, id: CustomerId) -> RepositoryResult<Option<Customer>>;

    /// Includes soft-deleted customers
    async fn get_by_email(&self, email: &Email) -> RepositoryResult<Option<Customer>>;

    /// Every customer that is not deleted, oldest first
    async fn get_all(&self) -> RepositoryResult<Vec<Customer>>;

    /// `page` starts at 1. `total_count` counts all matches, not just this page.
    async fn get_paged(
        &self,
        search: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> RepositoryResult<PagedResult<Customer>>;

    async fn find(&self, filter: &CustomerSearchFilter) -> RepositoryResult<PagedResult<Customer>>;

    async fn get_by_type(&self, customer_type: CustomerType) -> RepositoryResult<Vec<Customer>>;

    async fn get_by_status(&self, status: CustomerStatus) -> RepositoryResult<Vec<Customer>>;

    async fn get_by_city(&self, city: &str) -> RepositoryResult<Vec<Customer>>;

    async fn get_by_state(&self, state: &str) -> RepositoryResult<Vec<Customer>>;

    async fn get_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Customer>>;

    async fn exists(&self, id: CustomerId) -> RepositoryResult<bool>;

    /// True when a non-deleted customer already uses the email
    async fn email_exists(&self, email: &Email) -> RepositoryResult<bool>;

    async fn email_exists_excluding(&self, email: &Email, exclude: CustomerId) -> RepositoryResult<bool>;

    /// Customers that are not deleted
    async fn count(&self) -> RepositoryResult<u64>;

    async fn count_by_status(&self, status: CustomerStatus) -> RepositoryResult<u64>;

    async fn count_by_type(&self, customer_type: CustomerType) -> RepositoryResult<u64>;

    async fn get_statistics(&self) -> RepositoryResult<CustomerStatistics>;

    /// Stage a new customer
    async fn add(&self, customer: &Customer) -> RepositoryResult<()>;

    /// Stage the current state of a loaded customer
    fn update(&self, customer: &Customer) -> RepositoryResult<()>;

    /// Stage a soft delete. The aggregate must already be in `Deleted` status.
    fn delete(&self, customer: &Customer) -> RepositoryResult<()>;

    fn has_pending_changes(&self) -> bool;

    async fn save_changes(&self) -> RepositoryResult<()> {
        self.save_changes_with_result().await.map(|_| ())
    }

    /// Commit staged changes atomically and return how many records were written
    async fn save_changes_with_result(&self) -> RepositoryResult<usize>;
}

/// Hands each application operation its own unit of work
pub trait UnitOfWorkFactory: Send + Sync {
    fn begin(&self) -> Box<dyn CustomerRepository>;
}
