//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

use super::{OrderCancelled, OrderCreated, OrderError, OrderEvent, OrderPaid, OrderStatus};

/// A line of an order, priced when the order was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: Money,
}

impl OrderItem {
    pub fn new(product_id: ProductId, quantity: u32, price: Money) -> Self {
        Self {
            product_id,
            quantity,
            price,
        }
    }

    /// Returns price × quantity, or None on overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.price.checked_mul(self.quantity)
    }
}

/// Order aggregate root.
///
/// The total price is computed once in [`Order::create`] and never recomputed.
/// After creation the order only moves through saga-driven transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    items: Vec<OrderItem>,
    status: OrderStatus,
    total_price: Money,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new order from priced items.
    pub fn create(
        id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
    ) -> Result<(Self, OrderEvent), OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        let mut total_price = Money::zero();
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            if item.price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id,
                    price: item.price,
                });
            }
            total_price = item
                .line_total()
                .and_then(|line| total_price.checked_add(line))
                .ok_or(OrderError::TotalOverflow)?;
        }

        let now = Utc::now();
        let order = Self {
            id,
            user_id,
            items,
            status: OrderStatus::Created,
            total_price,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        let event = OrderEvent::Created(OrderCreated {
            order_id: id,
            user_id,
        });
        Ok((order, event))
    }

    /// Marks the order as paid.
    ///
    /// Returns `Ok(None)` if the order is already paid.
    pub fn mark_as_paid(&mut self) -> Result<Option<OrderEvent>, OrderError> {
        match self.status {
            OrderStatus::Paid => Ok(None),
            OrderStatus::Created => {
                self.status = OrderStatus::Paid;
                self.updated_at = Utc::now();
                Ok(Some(OrderEvent::Paid(OrderPaid { order_id: self.id })))
            }
            current => Err(OrderError::InvalidStatusTransition {
                current,
                action: "pay",
            }),
        }
    }

    /// Cancels the order.
    ///
    /// Returns `Ok(None)` if the order is already cancelled.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<Option<OrderEvent>, OrderError> {
        match self.status {
            OrderStatus::Cancelled => Ok(None),
            OrderStatus::Created => {
                let reason = reason.into();
                self.status = OrderStatus::Cancelled;
                self.cancel_reason = Some(reason.clone());
                self.updated_at = Utc::now();
                Ok(Some(OrderEvent::Cancelled(OrderCancelled {
                    order_id: self.id,
                    reason,
                })))
            }
            current => Err(OrderError::InvalidStatusTransition {
                current,
                action: "cancel",
            }),
        }
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
