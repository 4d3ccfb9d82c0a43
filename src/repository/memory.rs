use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;

use crate::domain::customer::{
    Customer, CustomerId, CustomerRecord, CustomerSearchFilter, CustomerStatistics,
    CustomerStatus, CustomerType, Email, PagedResult,
};
use super::{CustomerRepository, RepositoryError, RepositoryResult, UnitOfWorkFactory};

// ============================================================================
// In-Memory Customer Store
// ============================================================================
//
// Shared committed table plus per-unit-of-work staging:
// 1. add / update / delete push onto the unit's staged list
// 2. save_changes replays the list onto a copy of the table
// 3. optimistic concurrency and email uniqueness are checked on the copy
// 4. the copy replaces the table only if every check passed
//
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct InMemoryCustomerStore {
    customers: Arc<RwLock<HashMap<CustomerId, CustomerRecord>>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit_of_work(&self) -> InMemoryCustomerRepository {
        InMemoryCustomerRepository {
            store: self.clone(),
            staged: Mutex::new(Vec::new()),
        }
    }

    /// Committed records, including deleted ones
    pub async fn len(&self) -> usize {
        self.customers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.customers.read().await.is_empty()
    }
}

impl UnitOfWorkFactory for InMemoryCustomerStore {
    fn begin(&self) -> Box<dyn CustomerRepository> {
        Box::new(self.unit_of_work())
    }
}

#[derive(Debug, Clone)]
enum StagedChange {
    Add(CustomerRecord),
    Update(CustomerRecord),
    Delete(CustomerRecord),
}

impl StagedChange {
    fn record(&self) -> &CustomerRecord {
        match self {
            StagedChange::Add(r) | StagedChange::Update(r) | StagedChange::Delete(r) => r,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            StagedChange::Add(_) => "add",
            StagedChange::Update(_) => "update",
            StagedChange::Delete(_) => "delete",
        }
    }
}

#[derive(Debug)]
pub struct InMemoryCustomerRepository {
    store: InMemoryCustomerStore,
    staged: Mutex<Vec<StagedChange>>,
}

impl InMemoryCustomerRepository {
    fn staged(&self) -> MutexGuard<'_, Vec<StagedChange>> {
        self.staged.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Committed records matching `predicate`, oldest first
    async fn select(&self, predicate: impl Fn(&CustomerRecord) -> bool) -> Vec<CustomerRecord> {
        let customers = self.store.customers.read().await;
        let mut records: Vec<CustomerRecord> = customers.values().filter(|r| predicate(r)).cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    async fn select_customers(&self, predicate: impl Fn(&CustomerRecord) -> bool) -> Vec<Customer> {
        self.select(predicate).await.into_iter().map(Customer::from_record).collect()
    }

    fn stage(&self, change: StagedChange) {
        tracing::debug!(
            customer_id = %change.record().id,
            change = change.label(),
            "Staged customer change"
        );
        self.staged().push(change);
    }
}

fn apply_staged(
    committed: &HashMap<CustomerId, CustomerRecord>,
    staged: &[StagedChange],
) -> RepositoryResult<HashMap<CustomerId, CustomerRecord>> {
    let mut working = committed.clone();

    for change in staged {
        match change {
            StagedChange::Add(record) => {
                if working.contains_key(&record.id) {
                    return Err(RepositoryError::DuplicateId(record.id));
                }
                let mut record = record.clone();
                record.version = 1;
                working.insert(record.id, record);
            }
            StagedChange::Update(record) | StagedChange::Delete(record) => {
                if !working.contains_key(&record.id) {
                    return Err(RepositoryError::NotFound(record.id));
                }

                // Versions are checked against the table as it was when the
                // commit started, so repeated updates in one unit still pass.
                let next_version = match committed.get(&record.id) {
                    Some(current) if current.version != record.version => {
                        return Err(RepositoryError::ConcurrencyConflict {
                            id: record.id,
                            expected: record.version,
                            actual: current.version,
                        });
                    }
                    Some(current) => current.version + 1,
                    None => 1,
                };

                let mut record = record.clone();
                record.version = next_version;
                working.insert(record.id, record);
            }
        }
    }

    for change in staged {
        let record = change.record();
        let Some(written) = working.get(&record.id) else { continue };
        if written.is_deleted() {
            continue;
        }
        let duplicate = working
            .values()
            .any(|other| other.id != written.id && !other.is_deleted() && other.email == written.email);
        if duplicate {
            return Err(RepositoryError::DuplicateEmail(written.email.clone()));
        }
    }

    Ok(working)
}

#[async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn get_by_id(&self, id: CustomerId) -> RepositoryResult<Option<Customer>> {
        let customers = self.store.customers.read().await;
        Ok(customers.get(&id).cloned().map(Customer::from_record))
    }

    async fn get_by_email(&self, email: &Email) -> RepositoryResult<Option<Customer>> {
        // Prefer the live customer when a deleted one shares the address
        let mut matches = self.select(|r| &r.email == email).await;
        matches.sort_by_key(|r| r.is_deleted());
        Ok(matches.into_iter().next().map(Customer::from_record))
    }

    async fn get_all(&self) -> RepositoryResult<Vec<Customer>> {
        Ok(self.select_customers(|r| !r.is_deleted()).await)
    }

    async fn get_paged(
        &self,
        search: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> RepositoryResult<PagedResult<Customer>> {
        let mut filter = CustomerSearchFilter::new().page(page, page_size);
        filter.search_text = search.map(str::to_string);
        self.find(&filter).await
    }

    async fn find(&self, filter: &CustomerSearchFilter) -> RepositoryResult<PagedResult<Customer>> {
        filter.validate()?;

        let records = self.select(|r| filter.matches(r)).await;
        Ok(PagedResult::paginate(records, filter.page, filter.page_size).map(Customer::from_record))
    }

    async fn get_by_type(&self, customer_type: CustomerType) -> RepositoryResult<Vec<Customer>> {
        let filter = CustomerSearchFilter::new().with_type(customer_type);
        Ok(self.select_customers(|r| filter.matches(r)).await)
    }

    async fn get_by_status(&self, status: CustomerStatus) -> RepositoryResult<Vec<Customer>> {
        Ok(self.select_customers(|r| r.status == status).await)
    }

    async fn get_by_city(&self, city: &str) -> RepositoryResult<Vec<Customer>> {
        let filter = CustomerSearchFilter::new().with_city(city);
        Ok(self.select_customers(|r| filter.matches(r)).await)
    }

    async fn get_by_state(&self, state: &str) -> RepositoryResult<Vec<Customer>> {
        let filter = CustomerSearchFilter::new().with_state(state);
        Ok(self.select_customers(|r| filter.matches(r)).await)
    }

    async fn get_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> RepositoryResult<Vec<Customer>> {
        let filter = CustomerSearchFilter::new().created_between(from, to);
        filter.validate()?;
        Ok(self.select_customers(|r| filter.matches(r)).await)
    }

    async fn exists(&self, id: CustomerId) -> RepositoryResult<bool> {
        Ok(self.store.customers.read().await.contains_key(&id))
    }

    async fn email_exists(&self, email: &Email) -> RepositoryResult<bool> {
        let customers = self.store.customers.read().await;
        Ok(customers.values().any(|r| !r.is_deleted() && &r.email == email))
    }

    async fn email_exists_excluding(&self, email: &Email, exclude: CustomerId) -> RepositoryResult<bool> {
        let customers = self.store.customers.read().await;
        Ok(customers
            .values()
            .any(|r| r.id != exclude && !r.is_deleted() && &r.email == email))
    }

    async fn count(&self) -> RepositoryResult<u64> {
        let customers = self.store.customers.read().await;
        Ok(customers.values().filter(|r| !r.is_deleted()).count() as u64)
    }

    async fn count_by_status(&self, status: CustomerStatus) -> RepositoryResult<u64> {
        let customers = self.store.customers.read().await;
        Ok(customers.values().filter(|r| r.status == status).count() as u64)
    }

    async fn count_by_type(&self, customer_type: CustomerType) -> RepositoryResult<u64> {
        let customers = self.store.customers.read().await;
        Ok(customers
            .values()
            .filter(|r| !r.is_deleted() && r.customer_type == customer_type)
            .count() as u64)
    }

    async fn get_statistics(&self) -> RepositoryResult<CustomerStatistics> {
        let customers = self.store.customers.read().await;
        Ok(CustomerStatistics::from_records(customers.values()))
    }

    async fn add(&self, customer: &Customer) -> RepositoryResult<()> {
        self.stage(StagedChange::Add(customer.to_record()));
        Ok(())
    }

    fn update(&self, customer: &Customer) -> RepositoryResult<()> {
        self.stage(StagedChange::Update(customer.to_record()));
        Ok(())
    }

    fn delete(&self, customer: &Customer) -> RepositoryResult<()> {
        if customer.status() != CustomerStatus::Deleted {
            return Err(RepositoryError::Validation(format!(
                "customer {} must be marked deleted before it is staged for deletion",
                customer.id()
            )));
        }
        self.stage(StagedChange::Delete(customer.to_record()));
        Ok(())
    }

    fn has_pending_changes(&self) -> bool {
        !self.staged().is_empty()
    }

    async fn save_changes_with_result(&self) -> RepositoryResult<usize> {
        // The unit of work is spent either way; callers retry with fresh state
        let staged = std::mem::take(&mut *self.staged());
        if staged.is_empty() {
            return Ok(0);
        }

        let mut customers = self.store.customers.write().await;
        match apply_staged(&customers, &staged) {
            Ok(working) => {
                *customers = working;
                tracing::info!(affected = staged.len(), "Committed customer changes");
                Ok(staged.len())
            }
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    discarded = staged.len(),
                    "Customer commit rejected, no changes applied"
                );
                Err(error)
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
