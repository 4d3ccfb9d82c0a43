use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::core::{AggregateRoot, EventEnvelope, EventLog};
use super::commands::{NewCustomer, ProfileUpdate};
use super::errors::CustomerError;
use super::events::*;
use super::value_objects::{CustomerId, CustomerStatus, CustomerType, Email, PhoneNumber};

// ============================================================================
// Customer Record - plain data snapshot
// ============================================================================
//
// What storage, the cache and the wire carry. Converting a record back into
// an aggregate never raises events.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: CustomerId,
    pub email: Email,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<PhoneNumber>,
    pub customer_type: CustomerType,
    pub status: CustomerStatus,
    pub city: Option<String>,
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl CustomerRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_deleted(&self) -> bool {
        self.status == CustomerStatus::Deleted
    }
}

// ============================================================================
// Customer Aggregate - Business Logic
// ============================================================================

#[derive(Debug, Clone)]
pub struct Customer {
    id: CustomerId,
    email: Email,
    first_name: String,
    last_name: String,
    phone: Option<PhoneNumber>,
    customer_type: CustomerType,
    status: CustomerStatus,
    city: Option<String>,
    state: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    version: i64,
    events: EventLog<CustomerEvent>,
}

impl Customer {
    /// Factory for a brand new customer. Raises `CustomerCreated`.
    pub fn create(new: NewCustomer) -> Result<Self, CustomerError> {
        let first_name = required(new.first_name, CustomerError::EmptyFirstName)?;
        let last_name = required(new.last_name, CustomerError::EmptyLastName)?;

        let mut customer = Self {
            id: CustomerId::new(),
            email: new.email,
            first_name,
            last_name,
            phone: new.phone,
            customer_type: new.customer_type,
            status: CustomerStatus::Active,
            city: optional(new.city),
            state: optional(new.state),
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
            version: 0,
            events: EventLog::new(),
        };

        customer.raise(CustomerEvent::Created(CustomerCreated {
            customer_id: customer.id,
            email: customer.email.clone(),
        }));

        Ok(customer)
    }

    /// Rehydrate from storage or the wire. No events are raised.
    pub fn from_record(record: CustomerRecord) -> Self {
        Self {
            id: record.id,
            email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            phone: record.phone,
            customer_type: record.customer_type,
            status: record.status,
            city: record.city,
            state: record.state,
            created_at: record.created_at,
            updated_at: record.updated_at,
            deleted_at: record.deleted_at,
            version: record.version,
            events: EventLog::new(),
        }
    }

    pub fn to_record(&self) -> CustomerRecord {
        CustomerRecord {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            customer_type: self.customer_type,
            status: self.status,
            city: self.city.clone(),
            state: self.state.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            version: self.version,
        }
    }

    pub fn id(&self) -> CustomerId {
        self.id
    }

    pub fn email(&self) -> &Email {
        &self.email
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn phone(&self) -> Option<&PhoneNumber> {
        self.phone.as_ref()
    }

    pub fn customer_type(&self) -> CustomerType {
        self.customer_type
    }

    pub fn status(&self) -> CustomerStatus {
        self.status
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub fn update_profile(&mut self, update: ProfileUpdate) -> Result<(), CustomerError> {
        self.ensure_not_deleted("update")?;
        let first_name = required(update.first_name, CustomerError::EmptyFirstName)?;
        let last_name = required(update.last_name, CustomerError::EmptyLastName)?;

        self.email = update.email;
        self.first_name = first_name;
        self.last_name = last_name;
        self.phone = update.phone;
        self.city = optional(update.city);
        self.state = optional(update.state);
        self.touch();

        self.raise(CustomerEvent::Updated(CustomerUpdated {
            customer_id: self.id,
            email: self.email.clone(),
        }));
        Ok(())
    }

    pub fn change_type(&mut self, new_type: CustomerType) -> Result<(), CustomerError> {
        self.ensure_not_deleted("change the type of")?;
        if self.customer_type == new_type {
            return Err(CustomerError::TypeUnchanged(new_type));
        }

        let old_type = self.customer_type;
        self.customer_type = new_type;
        self.touch();

        self.raise(CustomerEvent::TypeChanged(CustomerTypeChanged {
            customer_id: self.id,
            email: self.email.clone(),
            old_type,
            new_type,
        }));
        Ok(())
    }

    /// Inactive -> Active. Deleted customers must be restored instead.
    pub fn activate(&mut self) -> Result<(), CustomerError> {
        self.transition("activate", &[CustomerStatus::Inactive], CustomerStatus::Active)?;
        self.raise(CustomerEvent::Activated(CustomerActivated {
            customer_id: self.id,
            email: self.email.clone(),
        }));
        Ok(())
    }

    /// Active -> Inactive
    pub fn deactivate(&mut self) -> Result<(), CustomerError> {
        self.transition("deactivate", &[CustomerStatus::Active], CustomerStatus::Inactive)?;
        self.raise(CustomerEvent::Deactivated(CustomerDeactivated {
            customer_id: self.id,
            email: self.email.clone(),
        }));
        Ok(())
    }

    /// Soft delete from Active or Inactive
    pub fn delete(&mut self) -> Result<(), CustomerError> {
        self.transition(
            "delete",
            &[CustomerStatus::Active, CustomerStatus::Inactive],
            CustomerStatus::Deleted,
        )?;
        self.deleted_at = self.updated_at;
        self.raise(CustomerEvent::Deleted(CustomerDeleted {
            customer_id: self.id,
            email: self.email.clone(),
        }));
        Ok(())
    }

    /// Deleted -> Active
    pub fn restore(&mut self) -> Result<(), CustomerError> {
        self.transition("restore", &[CustomerStatus::Deleted], CustomerStatus::Active)?;
        self.deleted_at = None;
        self.raise(CustomerEvent::Restored(CustomerRestored {
            customer_id: self.id,
            email: self.email.clone(),
        }));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn transition(
        &mut self,
        action: &'static str,
        allowed_from: &[CustomerStatus],
        to: CustomerStatus,
    ) -> Result<(), CustomerError> {
        if !allowed_from.contains(&self.status) {
            return Err(CustomerError::InvalidStateTransition {
                action,
                status: self.status,
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    fn ensure_not_deleted(&self, action: &'static str) -> Result<(), CustomerError> {
        match self.status {
            CustomerStatus::Deleted => Err(CustomerError::InvalidStateTransition {
                action,
                status: self.status,
            }),
            _ => Ok(()),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    fn raise(&mut self, event: CustomerEvent) {
        self.events.record(self.id.as_uuid(), event);
    }
}

impl AggregateRoot for Customer {
    type Id = CustomerId;
    type Event = CustomerEvent;

    fn aggregate_id(&self) -> CustomerId {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn pending_events(&self) -> &[EventEnvelope<CustomerEvent>] {
        self.events.pending()
    }

    fn take_events(&mut self) -> Vec<EventEnvelope<CustomerEvent>> {
        self.events.take()
    }
}

fn required(value: String, error: CustomerError) -> Result<String, CustomerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(error);
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn new_customer() -> NewCustomer {
        NewCustomer::new(
            Email::parse("Test@Example.com").unwrap(),
            "John",
            "Doe",
            CustomerType::Individual,
        )
        .with_phone(PhoneNumber::parse("555-123-4567").unwrap())
        .with_location("Austin", "TX")
    }

    fn event_types(customer: &Customer) -> Vec<String> {
        customer
            .pending_events()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    #[test]
    fn test_customer_creation() {
        let customer = Customer::create(new_customer()).unwrap();

        assert_eq!(customer.status(), CustomerStatus::Active);
        assert!(!customer.id().as_uuid().is_nil());
        assert_eq!(customer.email(), &Email::parse("test@example.com").unwrap());
        assert_eq!(customer.city(), Some("Austin"));
        assert_eq!(customer.version(), 0);

        let events = customer.pending_events();
        assert_eq!(events.len(), 1);
        match &events[0].event_data {
            CustomerEvent::Created(e) => {
                assert_eq!(e.customer_id, customer.id());
                assert_eq!(e.email.as_str(), "test@example.com");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_customer_creation_with_empty_name_fails() {
        let mut input = new_customer();
        input.first_name = "   ".to_string();

        let result = Customer::create(input);
        assert!(matches!(result.unwrap_err(), CustomerError::EmptyFirstName));
    }

    #[test]
    fn test_activating_active_customer_fails() {
        let mut customer = Customer::create(new_customer()).unwrap();

        let err = customer.activate().unwrap_err();
        assert!(matches!(
            err,
            CustomerError::InvalidStateTransition { action: "activate", status: CustomerStatus::Active }
        ));
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidStateTransition);
        assert_eq!(customer.pending_events().len(), 1);
    }

    #[test]
    fn test_deactivate_then_activate() {
        let mut customer = Customer::create(new_customer()).unwrap();
        customer.take_events();

        customer.deactivate().unwrap();
        assert_eq!(customer.status(), CustomerStatus::Inactive);
        assert!(customer.deactivate().is_err());

        customer.activate().unwrap();
        assert_eq!(customer.status(), CustomerStatus::Active);

        assert_eq!(event_types(&customer), vec!["CustomerDeactivated", "CustomerActivated"]);
        let events = customer.pending_events();
        assert!(events[0].sequence_number < events[1].sequence_number);
    }

    #[test]
    fn test_delete_and_restore() {
        let mut customer = Customer::create(new_customer()).unwrap();
        customer.take_events();

        customer.delete().unwrap();
        assert_eq!(customer.status(), CustomerStatus::Deleted);
        assert!(customer.deleted_at().is_some());
        assert!(customer.delete().is_err());

        // Deleted customers come back only through restore
        assert!(customer.activate().is_err());

        customer.restore().unwrap();
        assert_eq!(customer.status(), CustomerStatus::Active);
        assert!(customer.deleted_at().is_none());
        assert_eq!(event_types(&customer), vec!["CustomerDeleted", "CustomerRestored"]);
    }

    #[test]
    fn test_restore_requires_deleted_status() {
        let mut customer = Customer::create(new_customer()).unwrap();
        assert!(matches!(
            customer.restore(),
            Err(CustomerError::InvalidStateTransition { action: "restore", .. })
        ));
    }

    #[test]
    fn test_inactive_customer_can_be_deleted() {
        let mut customer = Customer::create(new_customer()).unwrap();
        customer.deactivate().unwrap();
        customer.delete().unwrap();
        assert_eq!(customer.status(), CustomerStatus::Deleted);
    }

    #[test]
    fn test_change_type() {
        let mut customer = Customer::create(new_customer()).unwrap();
        customer.take_events();

        customer.change_type(CustomerType::Business).unwrap();
        assert_eq!(customer.customer_type(), CustomerType::Business);

        match &customer.pending_events()[0].event_data {
            CustomerEvent::TypeChanged(e) => {
                assert_eq!(e.old_type, CustomerType::Individual);
                assert_eq!(e.new_type, CustomerType::Business);
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(matches!(
            customer.change_type(CustomerType::Business),
            Err(CustomerError::TypeUnchanged(CustomerType::Business))
        ));
    }

    #[test]
    fn test_update_profile() {
        let mut customer = Customer::create(new_customer()).unwrap();
        customer.take_events();

        customer
            .update_profile(ProfileUpdate {
                email: Email::parse("john.doe@example.com").unwrap(),
                first_name: " Johnny ".to_string(),
                last_name: "Doe".to_string(),
                phone: None,
                city: Some("Dallas".to_string()),
                state: Some("  ".to_string()),
            })
            .unwrap();

        assert_eq!(customer.first_name(), "Johnny");
        assert_eq!(customer.city(), Some("Dallas"));
        assert_eq!(customer.state(), None);
        assert!(customer.updated_at().is_some());

        match &customer.pending_events()[0].event_data {
            CustomerEvent::Updated(e) => assert_eq!(e.email.as_str(), "john.doe@example.com"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_cannot_modify_deleted_customer() {
        let mut customer = Customer::create(new_customer()).unwrap();
        customer.delete().unwrap();

        assert!(customer.change_type(CustomerType::Business).is_err());
        let result = customer.update_profile(ProfileUpdate {
            email: customer.email().clone(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            phone: None,
            city: None,
            state: None,
        });
        assert!(matches!(result, Err(CustomerError::InvalidStateTransition { .. })));
    }

    #[test]
    fn test_record_round_trip_raises_no_events() {
        let customer = Customer::create(new_customer()).unwrap();
        let record = customer.to_record();

        let restored = Customer::from_record(record.clone());
        assert!(!restored.has_pending_events());
        assert_eq!(restored.to_record(), record);
    }
}
