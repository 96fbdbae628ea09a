//! Transactional outbox rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::DomainEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::Result;

/// An event scheduled for publication, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    /// Stable identity of the event; becomes the message id on the wire.
    pub event_id: Uuid,
    pub event_type: String,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEvent {
    /// Builds an outbox row from a domain event.
    pub fn from_event(event: &dyn DomainEvent) -> Result<Self> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            routing_key: event.routing_key().to_string(),
            correlation_id: None,
            payload: event.payload()?,
            created_at: Utc::now(),
        })
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// A persisted outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Monotonic position within this store; defines dispatch order.
    pub sequence: i64,
    pub event_id: Uuid,
    pub event_type: String,
    pub routing_key: String,
    pub correlation_id: Option<String>,
    pub payload: Value,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait OutboxRepository: Send {
    /// Appends an event in the current transaction and returns its id.
    async fn append(&mut self, event: NewOutboxEvent) -> Result<Uuid>;

    /// Returns up to `limit` unpublished events in creation order.
    async fn fetch_unpublished(&mut self, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Marks an event as published. Marking twice is harmless.
    async fn mark_published(&mut self, event_id: Uuid) -> Result<()>;
}

/// Appends a domain event to the outbox of the current transaction.
pub async fn append_event(
    outbox: &mut dyn OutboxRepository,
    event: &dyn DomainEvent,
) -> Result<Uuid> {
    outbox.append(NewOutboxEvent::from_event(event)?).await
}
