//! Order domain events.

use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::DomainEvent;

/// Events that can occur on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    Created(OrderCreated),
    Paid(OrderPaid),
    Cancelled(OrderCancelled),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub reason: String,
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "order_created",
            OrderEvent::Paid(_) => "order_paid",
            OrderEvent::Cancelled(_) => "order_cancelled",
        }
    }

    fn routing_key(&self) -> &'static str {
        match self {
            OrderEvent::Created(_) => "order.created",
            OrderEvent::Paid(_) => "order.paid",
            OrderEvent::Cancelled(_) => "order.cancelled",
        }
    }

    fn payload(&self) -> serde_json::Result<Value> {
        match self {
            OrderEvent::Created(data) => serde_json::to_value(data),
            OrderEvent::Paid(data) => serde_json::to_value(data),
            OrderEvent::Cancelled(data) => serde_json::to_value(data),
        }
    }
}
