//! Wire payloads of the integration events exchanged between services.
//!
//! Field names are the wire contract. Identifiers are typed, so an
//! unparsable id fails decoding and is reported as a malformed payload.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use domain::Money;
use serde::{Deserialize, Serialize};

pub const ORDER_CREATED: &str = "order_created";
pub const ORDER_PAID: &str = "order_paid";
pub const ORDER_CANCELLED: &str = "order_cancelled";
pub const USER_CREATED: &str = "user_created";
pub const USER_UPDATED: &str = "user_updated";
pub const PRODUCT_CREATED: &str = "product_created";
pub const PRODUCT_UPDATED: &str = "product_updated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: OrderId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPaidPayload {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledPayload {
    pub order_id: OrderId,
    pub reason: String,
}

/// Body of `user_created` and `user_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    pub user_id: UserId,
    pub login: String,
    /// Source-side modification time, used to order projection updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body of `product_created` and `product_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPayload {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
