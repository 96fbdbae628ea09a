//! Payment account aggregate.

mod aggregate;
mod events;

pub use aggregate::Account;
pub use events::{AccountBalanceUpdated, AccountCreated, AccountEvent};

use common::ErrorClass;
use thiserror::Error;

use crate::money::Money;

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Money, requested: Money },

    #[error("Invalid amount {0} (must be greater than 0)")]
    InvalidAmount(Money),

    #[error("Invalid balance {0} (must not be negative)")]
    NegativeBalance(Money),

    #[error("Balance overflow")]
    Overflow,
}

impl AccountError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AccountError::InsufficientFunds { .. } => ErrorClass::Conflict,
            _ => ErrorClass::Validation,
        }
    }
}
