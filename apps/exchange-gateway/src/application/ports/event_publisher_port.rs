//! Event Publisher Port (Driven Port)
//!
//! Interface for handing canonical events to the external message bus.

use async_trait::async_trait;

use crate::domain::canonical::CanonicalEvent;

/// Event publishing error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventPublishError {
    /// Bus unreachable or closed.
    #[error("Event publish connection error: {message}")]
    ConnectionError { message: String },

    /// Serialization error.
    #[error("Event serialization error: {message}")]
    SerializationError { message: String },

    /// Publishing failed.
    #[error("Event publish failed: {message}")]
    PublishFailed { message: String },
}

/// Port for publishing canonical events.
#[async_trait]
pub trait EventPublisherPort: Send + Sync {
    /// Publish a batch, in order.
    async fn publish_events(&self, events: Vec<CanonicalEvent>) -> Result<(), EventPublishError>;

    /// Publish a single event.
    async fn publish_event(&self, event: CanonicalEvent) -> Result<(), EventPublishError> {
        self.publish_events(vec![event]).await
    }
}

/// Publisher that drops everything.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

#[async_trait]
impl EventPublisherPort for NoOpEventPublisher {
    async fn publish_events(&self, _events: Vec<CanonicalEvent>) -> Result<(), EventPublishError> {
        Ok(())
    }
}
