use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

// ============================================================================
// Event Envelope - Event Metadata
// ============================================================================
//
// Wraps a domain event with its identity and timing. Envelopes are created
// through `EventEnvelope::new` only, so every event gets a fresh id and a UTC
// timestamp at the moment the aggregate raised it.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope<E> {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    /// Position within the aggregate instance that raised it (1-based)
    pub sequence_number: i64,

    pub event_type: String,
    pub event_version: i32,

    pub event_data: E,

    pub occurred_on: DateTime<Utc>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    pub fn new(aggregate_id: Uuid, sequence_number: i64, event_data: E) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number,
            event_type: event_data.event_type().to_string(),
            event_version: E::event_version(),
            event_data,
            occurred_on: Utc::now(),
        }
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Implemented by the closed event enum of each aggregate.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Name of the concrete variant, e.g. "CustomerCreated"
    fn event_type(&self) -> &'static str;

    fn event_version() -> i32
    where
        Self: Sized,
    {
        1
    }
}

// ============================================================================
// Event Log - pending events of one aggregate instance
// ============================================================================

/// Ordered list of events raised by one aggregate instance and not yet
/// handed off. Sequence numbers keep counting across `take()` calls so
/// ordering stays unambiguous for the lifetime of the instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLog<E> {
    next_sequence: i64,
    pending: Vec<EventEnvelope<E>>,
}

impl<E> Default for EventLog<E> {
    fn default() -> Self {
        Self {
            next_sequence: 1,
            pending: Vec::new(),
        }
    }
}

impl<E: DomainEvent> EventLog<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, aggregate_id: Uuid, event: E) -> &EventEnvelope<E> {
        let envelope = EventEnvelope::new(aggregate_id, self.next_sequence, event);
        self.next_sequence += 1;
        self.pending.push(envelope);
        &self.pending[self.pending.len() - 1]
    }

    pub fn pending(&self) -> &[EventEnvelope<E>] {
        &self.pending
    }

    /// Drain pending events in the order they were raised
    pub fn take(&mut self) -> Vec<EventEnvelope<E>> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Event Serialization Helpers
// ============================================================================

pub fn serialize_event<E: Serialize>(event: &E) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

pub fn deserialize_event<E: DeserializeOwned>(json: &str) -> serde_json::Result<E> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    enum TestEvent {
        Opened { note: String },
        Closed,
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Opened { .. } => "TestOpened",
                TestEvent::Closed => "TestClosed",
            }
        }
    }

    #[test]
    fn test_event_envelope_creation() {
        let aggregate_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(aggregate_id, 1, TestEvent::Closed);

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.sequence_number, 1);
        assert_eq!(envelope.event_type, "TestClosed");
        assert_eq!(envelope.event_version, 1);
        assert!(!envelope.event_id.is_nil());
    }

    #[test]
    fn test_envelopes_get_distinct_ids() {
        let aggregate_id = Uuid::new_v4();
        let a = EventEnvelope::new(aggregate_id, 1, TestEvent::Closed);
        let b = EventEnvelope::new(aggregate_id, 2, TestEvent::Closed);

        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_event_log_keeps_order_and_sequence_across_take() {
        let aggregate_id = Uuid::new_v4();
        let mut log = EventLog::new();

        log.record(aggregate_id, TestEvent::Opened { note: "first".into() });
        log.record(aggregate_id, TestEvent::Closed);
        assert_eq!(log.len(), 2);

        let drained = log.take();
        assert!(log.is_empty());
        assert_eq!(drained[0].sequence_number, 1);
        assert_eq!(drained[1].sequence_number, 2);
        assert_eq!(drained[0].event_type, "TestOpened");

        let next = log.record(aggregate_id, TestEvent::Closed);
        assert_eq!(next.sequence_number, 3);
    }

    #[test]
    fn test_event_serialization() {
        let event = TestEvent::Opened { note: "test data".to_string() };

        let json = serialize_event(&event).unwrap();
        let deserialized: TestEvent = deserialize_event(&json).unwrap();

        assert_eq!(event, deserialized);
    }
}
