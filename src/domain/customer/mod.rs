// ============================================================================
// Customer Domain - Business Logic for the Customer Aggregate
// ============================================================================
//
// - Value objects (CustomerId, Email, PhoneNumber, CustomerType, CustomerStatus)
// - Events (CustomerCreated, CustomerTypeChanged, CustomerDeleted, ...)
// - Operation inputs (NewCustomer, ProfileUpdate)
// - Errors (CustomerError)
// - Aggregate (Customer) and its plain-data snapshot (CustomerRecord)
// - Query shapes (CustomerSearchFilter, PagedResult, CustomerStatistics)
// - Application service (CustomerService)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod query;
pub mod service;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use query::*;
pub use service::*;
