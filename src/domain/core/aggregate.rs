use super::event::{DomainEvent, EventEnvelope};

// ============================================================================
// Aggregate Root Pattern
// ============================================================================
//
// Key Principles:
// 1. State changes only through intention-revealing operations
// 2. Preconditions are validated before anything changes
// 3. Every successful operation raises exactly one event
// 4. Raised events wait in the aggregate until someone takes them
// 5. Aggregates never perform I/O
//
// ============================================================================

/// Generic aggregate root.
///
/// Type Parameters:
/// - `Id`: identity of the aggregate
/// - `Event`: closed event enum raised by the aggregate
pub trait AggregateRoot: Send + Sync {
    type Id;
    type Event: DomainEvent;

    fn aggregate_id(&self) -> Self::Id;

    /// Optimistic concurrency token as last loaded from storage
    fn version(&self) -> i64;

    /// Events raised since the last `take_events`
    fn pending_events(&self) -> &[EventEnvelope<Self::Event>];

    /// Drain raised events for hand-off to a publisher
    fn take_events(&mut self) -> Vec<EventEnvelope<Self::Event>>;

    fn has_pending_events(&self) -> bool {
        !self.pending_events().is_empty()
    }
}
