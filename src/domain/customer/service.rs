use std::sync::Arc;

use crate::domain::core::{AggregateRoot, EventEnvelope};
use crate::errors::ErrorKind;
use crate::messaging::EventPublisher;
use crate::metrics::Metrics;
use crate::repository::{CustomerRepository, RepositoryError, UnitOfWorkFactory};

use super::aggregate::{Customer, CustomerRecord};
use super::commands::{NewCustomer, ProfileUpdate};
use super::errors::CustomerError;
use super::events::CustomerEvent;
use super::query::{CustomerSearchFilter, CustomerStatistics, PagedResult};
use super::value_objects::{CustomerId, CustomerStatus, CustomerType, Email};

// ============================================================================
// Customer Service
// ============================================================================
//
// Orchestrates: begin unit of work → load → uniqueness check → aggregate
// operation → stage → save → publish
//
// Events are published only after a successful commit. A publish failure is
// logged and does not undo or fail the operation.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Customer(#[from] CustomerError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Customer not found: {0}")]
    NotFound(CustomerId),

    #[error("Email {0} is already used by another customer")]
    DuplicateEmail(Email),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Customer(e) => e.kind(),
            ServiceError::Repository(e) => e.kind(),
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::DuplicateEmail(_) => ErrorKind::UniqueConstraintViolation,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub struct CustomerService {
    units: Arc<dyn UnitOfWorkFactory>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Option<Arc<Metrics>>,
}

impl CustomerService {
    pub fn new(units: Arc<dyn UnitOfWorkFactory>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            units,
            publisher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn register(&self, new: NewCustomer) -> ServiceResult<CustomerRecord> {
        let repo = self.units.begin();

        if repo.email_exists(&new.email).await? {
            return Err(ServiceError::DuplicateEmail(new.email));
        }

        let customer = Customer::create(new)?;
        repo.add(&customer).await?;

        tracing::info!(customer_id = %customer.id(), email = %customer.email(), "Registering customer");
        self.commit("register", repo.as_ref(), customer).await
    }

    pub async fn update_profile(&self, id: CustomerId, update: ProfileUpdate) -> ServiceResult<CustomerRecord> {
        let repo = self.units.begin();
        let mut customer = load(repo.as_ref(), id).await?;

        if repo.email_exists_excluding(&update.email, id).await? {
            return Err(ServiceError::DuplicateEmail(update.email));
        }

        customer.update_profile(update)?;
        repo.update(&customer)?;
        self.commit("update_profile", repo.as_ref(), customer).await
    }

    /// Profile update and, when `new_type` differs from the current type, a
    /// type change. Both land in one commit or neither does.
    pub async fn update_details(
        &self,
        id: CustomerId,
        update: ProfileUpdate,
        new_type: Option<CustomerType>,
    ) -> ServiceResult<CustomerRecord> {
        let repo = self.units.begin();
        let mut customer = load(repo.as_ref(), id).await?;

        if repo.email_exists_excluding(&update.email, id).await? {
            return Err(ServiceError::DuplicateEmail(update.email));
        }

        let applied = customer.update_profile(update).and_then(|()| match new_type {
            Some(new_type) if new_type != customer.customer_type() => customer.change_type(new_type),
            _ => Ok(()),
        });
        if let Err(e) = applied {
            tracing::debug!(customer_id = %id, operation = "update_details", error = %e, "Customer operation rejected");
            self.record_outcome("update_details", "rejected");
            return Err(e.into());
        }

        repo.update(&customer)?;
        self.commit("update_details", repo.as_ref(), customer).await
    }

    pub async fn change_type(&self, id: CustomerId, new_type: CustomerType) -> ServiceResult<CustomerRecord> {
        self.mutate("change_type", id, |c| c.change_type(new_type)).await
    }

    pub async fn activate(&self, id: CustomerId) -> ServiceResult<CustomerRecord> {
        self.mutate("activate", id, Customer::activate).await
    }

    pub async fn deactivate(&self, id: CustomerId) -> ServiceResult<CustomerRecord> {
        self.mutate("deactivate", id, Customer::deactivate).await
    }

    pub async fn delete(&self, id: CustomerId) -> ServiceResult<CustomerRecord> {
        self.mutate("delete", id, Customer::delete).await
    }

    /// Brings a soft-deleted customer back. Fails if another live customer
    /// took the email in the meantime.
    pub async fn restore(&self, id: CustomerId) -> ServiceResult<CustomerRecord> {
        let repo = self.units.begin();
        let mut customer = load(repo.as_ref(), id).await?;

        if customer.status() == CustomerStatus::Deleted
            && repo.email_exists_excluding(customer.email(), id).await?
        {
            return Err(ServiceError::DuplicateEmail(customer.email().clone()));
        }

        customer.restore()?;
        repo.update(&customer)?;
        self.commit("restore", repo.as_ref(), customer).await
    }

    pub async fn get(&self, id: CustomerId) -> ServiceResult<CustomerRecord> {
        let repo = self.units.begin();
        Ok(load(repo.as_ref(), id).await?.to_record())
    }

    pub async fn get_by_email(&self, email: &Email) -> ServiceResult<Option<CustomerRecord>> {
        let repo = self.units.begin();
        Ok(repo.get_by_email(email).await?.map(|c| c.to_record()))
    }

    pub async fn search(&self, filter: &CustomerSearchFilter) -> ServiceResult<PagedResult<CustomerRecord>> {
        let repo = self.units.begin();
        Ok(repo.find(filter).await?.map(|c| c.to_record()))
    }

    pub async fn list_by_city(&self, city: &str) -> ServiceResult<Vec<CustomerRecord>> {
        let repo = self.units.begin();
        Ok(records(repo.get_by_city(city).await?))
    }

    pub async fn list_by_state(&self, state: &str) -> ServiceResult<Vec<CustomerRecord>> {
        let repo = self.units.begin();
        Ok(records(repo.get_by_state(state).await?))
    }

    pub async fn list_by_type(&self, customer_type: CustomerType) -> ServiceResult<Vec<CustomerRecord>> {
        let repo = self.units.begin();
        Ok(records(repo.get_by_type(customer_type).await?))
    }

    pub async fn statistics(&self) -> ServiceResult<CustomerStatistics> {
        let repo = self.units.begin();
        Ok(repo.get_statistics().await?)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn mutate<F>(&self, operation: &'static str, id: CustomerId, apply: F) -> ServiceResult<CustomerRecord>
    where
        F: FnOnce(&mut Customer) -> Result<(), CustomerError> + Send,
    {
        let repo = self.units.begin();
        let mut customer = load(repo.as_ref(), id).await?;
        let was_deleted = customer.status() == CustomerStatus::Deleted;

        if let Err(e) = apply(&mut customer) {
            tracing::debug!(customer_id = %id, operation, error = %e, "Customer operation rejected");
            self.record_outcome(operation, "rejected");
            return Err(e.into());
        }

        if !was_deleted && customer.status() == CustomerStatus::Deleted {
            repo.delete(&customer)?;
        } else {
            repo.update(&customer)?;
        }

        self.commit(operation, repo.as_ref(), customer).await
    }

    async fn commit(
        &self,
        operation: &'static str,
        repo: &dyn CustomerRepository,
        mut customer: Customer,
    ) -> ServiceResult<CustomerRecord> {
        let id = customer.id();
        let events = customer.take_events();

        if let Err(e) = repo.save_changes().await {
            tracing::warn!(customer_id = %id, operation, error = %e, "Customer commit failed");
            self.record_outcome(operation, "failed");
            return Err(e.into());
        }

        self.record_outcome(operation, "committed");
        self.publish(operation, &events).await;

        Ok(load(repo, id).await?.to_record())
    }

    async fn publish(&self, operation: &'static str, events: &[EventEnvelope<CustomerEvent>]) {
        if events.is_empty() {
            return;
        }

        match self.publisher.publish(events).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    for envelope in events {
                        metrics.record_event_published(&envelope.event_type);
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    operation,
                    event_count = events.len(),
                    error = %e,
                    "Failed to publish customer events after commit"
                );
            }
        }
    }

    fn record_outcome(&self, operation: &'static str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_domain_operation(operation, outcome);
        }
    }
}

async fn load(repo: &dyn CustomerRepository, id: CustomerId) -> ServiceResult<Customer> {
    repo.get_by_id(id).await?.ok_or(ServiceError::NotFound(id))
}

fn records(customers: Vec<Customer>) -> Vec<CustomerRecord> {
    customers.iter().map(Customer::to_record).collect()
}

// ============================================================================
// Unit Tests
// ============================================================================
