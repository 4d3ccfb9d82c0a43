use serde::{Deserialize, Serialize};

use crate::domain::core::DomainEvent;
use super::value_objects::{CustomerId, CustomerType, Email};

// ============================================================================
// Customer Domain Events
// ============================================================================

/// Union type for all customer events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CustomerEvent {
    Created(CustomerCreated),
    Updated(CustomerUpdated),
    TypeChanged(CustomerTypeChanged),
    Activated(CustomerActivated),
    Deactivated(CustomerDeactivated),
    Deleted(CustomerDeleted),
    Restored(CustomerRestored),
}

impl CustomerEvent {
    pub fn customer_id(&self) -> CustomerId {
        match self {
            CustomerEvent::Created(e) => e.customer_id,
            CustomerEvent::Updated(e) => e.customer_id,
            CustomerEvent::TypeChanged(e) => e.customer_id,
            CustomerEvent::Activated(e) => e.customer_id,
            CustomerEvent::Deactivated(e) => e.customer_id,
            CustomerEvent::Deleted(e) => e.customer_id,
            CustomerEvent::Restored(e) => e.customer_id,
        }
    }

    pub fn email(&self) -> &Email {
        match self {
            CustomerEvent::Created(e) => &e.email,
            CustomerEvent::Updated(e) => &e.email,
            CustomerEvent::TypeChanged(e) => &e.email,
            CustomerEvent::Activated(e) => &e.email,
            CustomerEvent::Deactivated(e) => &e.email,
            CustomerEvent::Deleted(e) => &e.email,
            CustomerEvent::Restored(e) => &e.email,
        }
    }
}

impl DomainEvent for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::Created(_) => "CustomerCreated",
            CustomerEvent::Updated(_) => "CustomerUpdated",
            CustomerEvent::TypeChanged(_) => "CustomerTypeChanged",
            CustomerEvent::Activated(_) => "CustomerActivated",
            CustomerEvent::Deactivated(_) => "CustomerDeactivated",
            CustomerEvent::Deleted(_) => "CustomerDeleted",
            CustomerEvent::Restored(_) => "CustomerRestored",
        }
    }
}

// Individual event types

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerCreated {
    pub customer_id: CustomerId,
    pub email: Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerUpdated {
    pub customer_id: CustomerId,
    pub email: Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerTypeChanged {
    pub customer_id: CustomerId,
    pub email: Email,
    pub old_type: CustomerType,
    pub new_type: CustomerType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerActivated {
    pub customer_id: CustomerId,
    pub email: Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDeactivated {
    pub customer_id: CustomerId,
    pub email: Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDeleted {
    pub customer_id: CustomerId,
    pub email: Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRestored {
    pub customer_id: CustomerId,
    pub email: Email,
}
