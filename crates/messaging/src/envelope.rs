//! The message envelope exchanged over the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use store::OutboxEvent;
use uuid::Uuid;

use crate::ConsumeError;

/// The only content type consumers accept.
pub const CONTENT_TYPE: &str = "application/json";

/// One message as seen by a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Stable across redeliveries; the idempotency key on the consumer side.
    pub message_id: String,
    /// The declared type tag, e.g. `user_created`.
    pub event_type: String,
    pub correlation_id: Option<String>,
    pub content_type: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// How many times the broker has redelivered this message.
    pub redelivery_count: u32,
}

impl Delivery {
    /// Builds a JSON delivery with a fresh message id.
    pub fn json<T: Serialize>(
        event_type: impl Into<String>,
        routing_key: impl Into<String>,
        body: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            correlation_id: None,
            content_type: CONTENT_TYPE.to_string(),
            routing_key: routing_key.into(),
            body: serde_json::to_vec(body)?,
            timestamp: Utc::now(),
            redelivery_count: 0,
        })
    }

    /// Builds the delivery for an outbox row. The message id is the row's
    /// event id, so every redelivery of the row carries the same id.
    pub fn from_outbox(event: &OutboxEvent) -> serde_json::Result<Self> {
        Ok(Self {
            message_id: event.event_id.to_string(),
            event_type: event.event_type.clone(),
            correlation_id: event.correlation_id.clone(),
            content_type: CONTENT_TYPE.to_string(),
            routing_key: event.routing_key.clone(),
            body: serde_json::to_vec(&event.payload)?,
            timestamp: event.created_at,
            redelivery_count: 0,
        })
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Decodes the body, reporting failures as permanent errors.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, ConsumeError> {
        serde_json::from_slice(&self.body).map_err(|e| ConsumeError::malformed(&self.event_type, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbox_delivery_uses_event_id_as_message_id() {
        let event = OutboxEvent {
            sequence: 7,
            event_id: Uuid::new_v4(),
            event_type: "order_paid".to_string(),
            routing_key: "order.paid".to_string(),
            correlation_id: Some("c-1".to_string()),
            payload: json!({"order_id": "x"}),
            published: false,
            created_at: Utc::now(),
            published_at: None,
        };

        let delivery = Delivery::from_outbox(&event).unwrap();
        assert_eq!(delivery.message_id, event.event_id.to_string());
        assert_eq!(delivery.content_type, CONTENT_TYPE);
        assert_eq!(delivery.correlation_id.as_deref(), Some("c-1"));
        let body: serde_json::Value = delivery.decode_body().unwrap();
        assert_eq!(body, json!({"order_id": "x"}));
    }

    #[test]
    fn test_decode_body_reports_malformed() {
        let mut delivery = Delivery::json("user_created", "user.created", &json!({})).unwrap();
        delivery.body = b"not json".to_vec();
        let err = delivery.decode_body::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, ConsumeError::Malformed { .. }));
    }
}
