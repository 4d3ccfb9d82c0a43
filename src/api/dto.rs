use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::customer::{
    CustomerError, CustomerType, Email, NewCustomer, PhoneNumber, ProfileUpdate,
};

// ============================================================================
// Request bodies sent to the customer service
// ============================================================================

/// Body of `POST /api/customers`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerRequest {
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,

    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    #[validate(custom(function = "validate_not_blank"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    #[validate(custom(function = "validate_not_blank"))]
    pub last_name: String,

    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,

    pub customer_type: CustomerType,

    #[validate(length(max = 100, message = "City must be at most 100 characters"))]
    pub city: Option<String>,

    #[validate(length(max = 100, message = "State must be at most 100 characters"))]
    pub state: Option<String>,
}

impl CreateCustomerRequest {
    pub fn new(
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        customer_type: CustomerType,
    ) -> Self {
        Self {
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            customer_type,
            city: None,
            state: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_location(mut self, city: impl Into<String>, state: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self.state = Some(state.into());
        self
    }

    pub fn to_new_customer(&self) -> Result<NewCustomer, CustomerError> {
        Ok(NewCustomer {
            email: Email::parse(&self.email)?,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.as_deref().map(PhoneNumber::parse).transpose()?,
            customer_type: self.customer_type,
            city: self.city.clone(),
            state: self.state.clone(),
        })
    }
}

/// Body of `PUT /api/customers/{id}`. Replaces the profile; the type only
/// changes when one is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCustomerRequest {
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,

    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    #[validate(custom(function = "validate_not_blank"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    #[validate(custom(function = "validate_not_blank"))]
    pub last_name: String,

    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,

    pub customer_type: Option<CustomerType>,

    #[validate(length(max = 100, message = "City must be at most 100 characters"))]
    pub city: Option<String>,

    #[validate(length(max = 100, message = "State must be at most 100 characters"))]
    pub state: Option<String>,
}

impl UpdateCustomerRequest {
    pub fn new(
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            customer_type: None,
            city: None,
            state: None,
        }
    }

    pub fn with_type(mut self, customer_type: CustomerType) -> Self {
        self.customer_type = Some(customer_type);
        self
    }

    pub fn with_location(mut self, city: impl Into<String>, state: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self.state = Some(state.into());
        self
    }

    pub fn to_profile_update(&self) -> Result<ProfileUpdate, CustomerError> {
        Ok(ProfileUpdate {
            email: Email::parse(&self.email)?,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.as_deref().map(PhoneNumber::parse).transpose()?,
            city: self.city.clone(),
            state: self.state.clone(),
        })
    }
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message("Must not be blank".into()));
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    PhoneNumber::parse(phone)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_phone").with_message("Phone number is not valid".into()))
}
