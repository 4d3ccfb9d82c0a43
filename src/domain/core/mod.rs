// ============================================================================
// Domain Core - Generic Aggregate and Event Abstractions
// ============================================================================
//
// No customer-specific code lives here.
//
// ============================================================================

pub mod aggregate;
pub mod event;

pub use aggregate::AggregateRoot;
pub use event::{deserialize_event, serialize_event, DomainEvent, EventEnvelope, EventLog};
