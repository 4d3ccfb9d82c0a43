// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// `core` holds the aggregate and event plumbing shared by every aggregate.
// Each aggregate has its own subdirectory with:
// - Value objects
// - Events
// - Operation inputs
// - Errors
// - Aggregate implementation
// - Application service
//
// Nothing in here knows about caching, HTTP or tokens.
//
// ============================================================================

pub mod core;
pub mod customer;
