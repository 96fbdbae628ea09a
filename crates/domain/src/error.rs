//! Domain error types.

use common::{ErrorClass, OrderId, ProductId, UserId};
use thiserror::Error;

use crate::account::AccountError;
use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error raised by the order aggregate.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// An error raised by the account aggregate.
    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Account not found for user {0}")]
    AccountNotFound(UserId),

    /// An identifier could not be parsed.
    #[error("Invalid {field}: {value}")]
    InvalidIdentifier { field: &'static str, value: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Classifies the error for retry and reporting decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            DomainError::Order(e) => e.class(),
            DomainError::Account(e) => e.class(),
            DomainError::UserNotFound(_)
            | DomainError::ProductNotFound(_)
            | DomainError::OrderNotFound(_)
            | DomainError::AccountNotFound(_)
            | DomainError::InvalidIdentifier { .. }
            | DomainError::Serialization(_) => ErrorClass::Validation,
        }
    }

    /// Builds an `InvalidIdentifier` error for a value that failed to parse.
    pub fn invalid_id(field: &'static str, value: impl Into<String>) -> Self {
        DomainError::InvalidIdentifier {
            field,
            value: value.into(),
        }
    }
}

/// Convenience type alias for domain results.
pub type Result<T> = std::result::Result<T, DomainError>;
