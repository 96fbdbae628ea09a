//! Customer notification records.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message sent to a customer about one of their orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub order_id: OrderId,
    /// Unknown for events that only carry the order id.
    pub user_id: Option<UserId>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(order_id: OrderId, user_id: Option<UserId>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            user_id,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn order_created(order_id: OrderId, user_id: Option<UserId>) -> Self {
        Self::new(order_id, user_id, format!("Order #{order_id} has been created."))
    }

    pub fn order_paid(order_id: OrderId) -> Self {
        Self::new(
            order_id,
            None,
            format!("Order #{order_id} has been paid successfully."),
        )
    }

    pub fn order_cancelled(order_id: OrderId, reason: &str) -> Self {
        Self::new(
            order_id,
            None,
            format!("Order #{order_id} has been cancelled. Reason: {reason}"),
        )
    }
}
