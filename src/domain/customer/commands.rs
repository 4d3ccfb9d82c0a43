use super::value_objects::{CustomerType, Email, PhoneNumber};

// ============================================================================
// Customer Operation Inputs
// ============================================================================
//
// Already-validated value objects go in; free-text fields are trimmed and
// checked by the aggregate.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub email: Email,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<PhoneNumber>,
    pub customer_type: CustomerType,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl NewCustomer {
    pub fn new(
        email: Email,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        customer_type: CustomerType,
    ) -> Self {
        Self {
            email,
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
            customer_type,
            city: None,
            state: None,
        }
    }

    pub fn with_phone(mut self, phone: PhoneNumber) -> Self {
        self.phone = Some(phone);
        self
    }

    pub fn with_location(mut self, city: impl Into<String>, state: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self.state = Some(state.into());
        self
    }
}

/// Full replacement of the editable profile fields
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub email: Email,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<PhoneNumber>,
    pub city: Option<String>,
    pub state: Option<String>,
}
