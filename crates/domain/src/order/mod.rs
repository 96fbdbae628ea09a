//! Order aggregate and related types.

mod aggregate;
mod events;
mod status;

pub use aggregate::{Order, OrderItem};
pub use events::{OrderCancelled, OrderCreated, OrderEvent, OrderPaid};
pub use status::OrderStatus;

use common::{ErrorClass, ProductId};
use thiserror::Error;

use crate::money::Money;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    #[error("Invalid quantity {quantity} for product {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    #[error("Invalid price {price} for product {product_id} (must not be negative)")]
    InvalidPrice { product_id: ProductId, price: Money },

    /// The order total does not fit the money representation.
    #[error("Order total overflows")]
    TotalOverflow,

    /// Order is not in the expected status.
    #[error("Invalid status transition: cannot {action} an order in {current} status")]
    InvalidStatusTransition {
        current: OrderStatus,
        action: &'static str,
    },
}

impl OrderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            OrderError::InvalidStatusTransition { .. } => ErrorClass::Conflict,
            _ => ErrorClass::Validation,
        }
    }
}
