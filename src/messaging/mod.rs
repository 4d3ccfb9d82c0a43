use async_trait::async_trait;
use std::sync::Mutex;

use crate::domain::core::{serialize_event, EventEnvelope};
use crate::domain::customer::CustomerEvent;

// ============================================================================
// Event Publisher Boundary
// ============================================================================
//
// Domain events leave the core through this trait. Delivery guarantees
// (outbox, broker, retries) belong to the implementation; the core only
// promises correct production and per-aggregate ordering.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to serialize event {event_id}: {message}")]
    Serialization { event_id: uuid::Uuid, message: String },

    #[error("Publisher unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish events in the order given
    async fn publish(&self, events: &[EventEnvelope<CustomerEvent>]) -> Result<(), PublishError>;
}

/// Emits one structured log record per event
#[derive(Debug, Default, Clone)]
pub struct LoggingEventPublisher {
    topic: String,
}

impl LoggingEventPublisher {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into() }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, events: &[EventEnvelope<CustomerEvent>]) -> Result<(), PublishError> {
        for envelope in events {
            let payload = serialize_event(&envelope.event_data).map_err(|e| PublishError::Serialization {
                event_id: envelope.event_id,
                message: e.to_string(),
            })?;

            tracing::info!(
                topic = %self.topic,
                event_id = %envelope.event_id,
                aggregate_id = %envelope.aggregate_id,
                sequence = envelope.sequence_number,
                event_type = %envelope.event_type,
                payload = %payload,
                "Published domain event"
            );
        }
        Ok(())
    }
}

/// Keeps everything it is handed, in order
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    published: Mutex<Vec<EventEnvelope<CustomerEvent>>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<EventEnvelope<CustomerEvent>> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.published().into_iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, events: &[EventEnvelope<CustomerEvent>]) -> Result<(), PublishError> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::core::AggregateRoot;
    use crate::domain::customer::{Customer, CustomerType, Email, NewCustomer};

    #[tokio::test]
    async fn test_in_memory_publisher_keeps_order() {
        let mut customer = Customer::create(NewCustomer::new(
            Email::parse("order@example.com").unwrap(),
            "Grace",
            "Hopper",
            CustomerType::Individual,
        ))
        .unwrap();
        customer.deactivate().unwrap();

        let publisher = InMemoryEventPublisher::new();
        publisher.publish(&customer.take_events()).await.unwrap();

        assert_eq!(publisher.event_types(), vec!["CustomerCreated", "CustomerDeactivated"]);
    }

    #[tokio::test]
    async fn test_logging_publisher_accepts_events() {
        let customer = Customer::create(NewCustomer::new(
            Email::parse("log@example.com").unwrap(),
            "Alan",
            "Turing",
            CustomerType::Business,
        ))
        .unwrap();

        let publisher = LoggingEventPublisher::new("customer-events");
        assert!(publisher.publish(customer.pending_events()).await.is_ok());
    }
}
