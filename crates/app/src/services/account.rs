//! Account application service.

use common::UserId;
use domain::{Account, AccountError, AccountEvent, DomainError, Money};
use store::outbox::append_event;
use store::{LockingUnitOfWork, Store, UnitOfWork};

use crate::error::ServiceError;

/// Scope of the idempotency keys accepted by charge and refund.
pub const ACCOUNT_IDEMPOTENCY_SCOPE: &str = "account_service";

type BalanceChange = fn(&mut Account, Money) -> Result<AccountEvent, AccountError>;

pub fn account_lock(user_id: UserId) -> String {
    format!("account_{user_id}")
}

/// Owns the payment accounts.
///
/// Every mutation holds the account lock, so the balance read for a
/// decision is the balance the change is applied to. Each balance change
/// appends `account_balance_updated` to the outbox in the same transaction.
pub struct AccountAppService<S: Store> {
    uow: UnitOfWork<S>,
    luow: LockingUnitOfWork<S>,
}

impl<S: Store> Clone for AccountAppService<S> {
    fn clone(&self) -> Self {
        Self {
            uow: self.uow.clone(),
            luow: self.luow.clone(),
        }
    }
}

impl<S: Store> AccountAppService<S> {
    pub fn new(store: S) -> Self {
        Self {
            uow: UnitOfWork::new(store.clone()),
            luow: LockingUnitOfWork::new(store),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_account(
        &self,
        user_id: UserId,
        initial_balance: Money,
    ) -> Result<Account, ServiceError> {
        self.luow
            .execute([account_lock(user_id)], move |repos| {
                Box::pin(async move {
                    if repos.accounts().find(user_id).await?.is_some() {
                        return Err(ServiceError::AlreadyExists(format!(
                            "account for user {user_id}"
                        )));
                    }
                    let (account, event) =
                        Account::open(user_id, initial_balance).map_err(DomainError::from)?;
                    repos.accounts().store(&account).await?;
                    append_event(repos.outbox(), &event).await?;
                    Ok(account)
                })
            })
            .await
    }

    /// Sets the balance to an absolute value.
    #[tracing::instrument(skip(self))]
    pub async fn update_balance(
        &self,
        user_id: UserId,
        balance: Money,
    ) -> Result<Account, ServiceError> {
        self.luow
            .execute([account_lock(user_id)], move |repos| {
                Box::pin(async move {
                    let mut account = repos
                        .accounts()
                        .find(user_id)
                        .await?
                        .ok_or(DomainError::AccountNotFound(user_id))?;
                    if let Some(event) =
                        account.update_balance(balance).map_err(DomainError::from)?
                    {
                        repos.accounts().store(&account).await?;
                        append_event(repos.outbox(), &event).await?;
                    }
                    Ok::<_, ServiceError>(account)
                })
            })
            .await
    }

    /// Debits the account.
    ///
    /// With an idempotency key, repeating a charge that already succeeded
    /// returns the account unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn charge(
        &self,
        user_id: UserId,
        amount: Money,
        idempotency_key: Option<String>,
    ) -> Result<Account, ServiceError> {
        self.change_balance(user_id, amount, idempotency_key, Account::charge)
            .await
    }

    /// Credits the account.
    #[tracing::instrument(skip(self))]
    pub async fn refund(
        &self,
        user_id: UserId,
        amount: Money,
        idempotency_key: Option<String>,
    ) -> Result<Account, ServiceError> {
        self.change_balance(user_id, amount, idempotency_key, Account::refund)
            .await
    }

    pub async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, ServiceError> {
        self.uow
            .execute(move |repos| {
                Box::pin(async move {
                    let account = repos.accounts().find(user_id).await?;
                    Ok::<_, ServiceError>(account)
                })
            })
            .await
    }

    async fn change_balance(
        &self,
        user_id: UserId,
        amount: Money,
        idempotency_key: Option<String>,
        change: BalanceChange,
    ) -> Result<Account, ServiceError> {
        self.luow
            .execute([account_lock(user_id)], move |repos| {
                Box::pin(async move {
                    if let Some(key) = &idempotency_key
                        && repos
                            .idempotency()
                            .is_processed(ACCOUNT_IDEMPOTENCY_SCOPE, key)
                            .await?
                    {
                        tracing::debug!(key = %key, "Balance change already applied");
                        return repos
                            .accounts()
                            .find(user_id)
                            .await?
                            .ok_or_else(|| DomainError::AccountNotFound(user_id).into());
                    }

                    let mut account = repos
                        .accounts()
                        .find(user_id)
                        .await?
                        .ok_or(DomainError::AccountNotFound(user_id))?;
                    let event = change(&mut account, amount).map_err(DomainError::from)?;
                    repos.accounts().store(&account).await?;
                    append_event(repos.outbox(), &event).await?;
                    if let Some(key) = &idempotency_key {
                        repos
                            .idempotency()
                            .record(ACCOUNT_IDEMPOTENCY_SCOPE, key)
                            .await?;
                    }

                    tracing::info!(
                        %user_id,
                        %amount,
                        balance = %account.balance,
                        "Balance changed"
                    );
                    Ok::<_, ServiceError>(account)
                })
            })
            .await
    }
}
