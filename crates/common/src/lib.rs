//! Shared types for the order fulfillment services.

pub mod class;
pub mod types;

pub use class::ErrorClass;
pub use types::{OrderId, ProductId, UserId};
