//! Account aggregate implementation.

use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

use crate::money::Money;

use super::{AccountBalanceUpdated, AccountCreated, AccountError, AccountEvent};

/// A user's payment account.
///
/// Invariant: `balance >= 0` whenever the account is at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Opens an account with an initial balance.
    pub fn open(
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<(Self, AccountEvent), AccountError> {
        if initial_balance.is_negative() {
            return Err(AccountError::NegativeBalance(initial_balance));
        }

        let now = Utc::now();
        let account = Self {
            user_id,
            balance: initial_balance,
            created_at: now,
            updated_at: now,
        };
        let event = AccountEvent::Created(AccountCreated {
            user_id,
            balance: initial_balance,
            created_at: now,
        });
        Ok((account, event))
    }

    /// Debits the account.
    pub fn charge(&mut self, amount: Money) -> Result<AccountEvent, AccountError> {
        if !amount.is_positive() {
            return Err(AccountError::InvalidAmount(amount));
        }
        if self.balance < amount {
            return Err(AccountError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }

        let balance = self
            .balance
            .checked_sub(amount)
            .ok_or(AccountError::Overflow)?;
        Ok(self.set_balance(balance))
    }

    /// Credits the account.
    pub fn refund(&mut self, amount: Money) -> Result<AccountEvent, AccountError> {
        if !amount.is_positive() {
            return Err(AccountError::InvalidAmount(amount));
        }

        let balance = self
            .balance
            .checked_add(amount)
            .ok_or(AccountError::Overflow)?;
        Ok(self.set_balance(balance))
    }

    /// Overwrites the balance. Returns `Ok(None)` when nothing changed.
    pub fn update_balance(
        &mut self,
        new_balance: Money,
    ) -> Result<Option<AccountEvent>, AccountError> {
        if new_balance.is_negative() {
            return Err(AccountError::NegativeBalance(new_balance));
        }
        if self.balance == new_balance {
            return Ok(None);
        }
        Ok(Some(self.set_balance(new_balance)))
    }

    fn set_balance(&mut self, balance: Money) -> AccountEvent {
        self.balance = balance;
        self.updated_at = Utc::now();
        AccountEvent::BalanceUpdated(AccountBalanceUpdated {
            user_id: self.user_id,
            balance,
            updated_at: self.updated_at,
        })
    }
}
