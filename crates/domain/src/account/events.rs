//! Account domain events.

use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::DomainEvent;
use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    Created(AccountCreated),
    BalanceUpdated(AccountBalanceUpdated),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreated {
    pub user_id: UserId,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalanceUpdated {
    pub user_id: UserId,
    pub balance: Money,
    pub updated_at: DateTime<Utc>,
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Created(_) => "account_created",
            AccountEvent::BalanceUpdated(_) => "account_balance_updated",
        }
    }

    fn routing_key(&self) -> &'static str {
        match self {
            AccountEvent::Created(_) => "account.created",
            AccountEvent::BalanceUpdated(_) => "account.balance_updated",
        }
    }

    fn payload(&self) -> serde_json::Result<Value> {
        match self {
            AccountEvent::Created(data) => serde_json::to_value(data),
            AccountEvent::BalanceUpdated(data) => serde_json::to_value(data),
        }
    }
}
