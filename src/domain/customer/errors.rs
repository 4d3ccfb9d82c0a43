use super::value_objects::CustomerStatus;
use crate::errors::ErrorKind;

// ============================================================================
// Customer Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CustomerError {
    #[error("Customer id cannot be empty")]
    EmptyId,

    #[error("Invalid customer id: {0}")]
    InvalidId(String),

    #[error("Email cannot be empty")]
    EmptyEmail,

    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("First name cannot be empty")]
    EmptyFirstName,

    #[error("Last name cannot be empty")]
    EmptyLastName,

    #[error("Unknown customer type: {0}")]
    UnknownType(String),

    #[error("Cannot {action} a customer whose status is {status}")]
    InvalidStateTransition {
        action: &'static str,
        status: CustomerStatus,
    },

    #[error("Customer type is already {0}")]
    TypeUnchanged(super::value_objects::CustomerType),
}

impl CustomerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CustomerError::InvalidStateTransition { .. } | CustomerError::TypeUnchanged(_) => {
                ErrorKind::InvalidStateTransition
            }
            _ => ErrorKind::Validation,
        }
    }
}
