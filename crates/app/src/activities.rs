//! The saga activities, implemented over the local services.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProductId;
use saga::order_fulfillment::{NotificationInput, PaymentInput, ProductsInput};
use saga::{Activity, ActivityError, ActivityExecutor, ActivityRequest};
use serde_json::Value;
use store::{Store, UnitOfWork};

use crate::error::ServiceError;
use crate::notifier::Notifier;
use crate::services::AccountAppService;

impl From<ServiceError> for ActivityError {
    fn from(err: ServiceError) -> Self {
        ActivityError::new(err.class(), err.to_string())
    }
}

/// Executes every saga activity against this service's store.
///
/// Payment activities pass the request's idempotency key to the account
/// service, so a charge re-invoked after a crash is applied once.
pub struct ServiceActivities<S: Store, N: Notifier> {
    uow: UnitOfWork<S>,
    accounts: AccountAppService<S>,
    notifier: Arc<N>,
}

impl<S: Store, N: Notifier> ServiceActivities<S, N> {
    pub fn new(store: S, notifier: Arc<N>) -> Self {
        Self {
            uow: UnitOfWork::new(store.clone()),
            accounts: AccountAppService::new(store),
            notifier,
        }
    }

    /// Confirms every product exists in the product cache.
    async fn reserve_products(&self, input: ProductsInput) -> Result<Value, ActivityError> {
        let requested: BTreeSet<ProductId> = input.items.iter().map(|i| i.product_id).collect();
        let ids: Vec<ProductId> = requested.iter().copied().collect();

        let found = self
            .uow
            .execute(move |repos| {
                Box::pin(async move {
                    Ok::<_, ServiceError>(repos.local_products().find_many(&ids).await?)
                })
            })
            .await?;

        let found: BTreeSet<ProductId> = found.iter().map(|p| p.product_id).collect();
        if let Some(missing) = requested.difference(&found).next() {
            return Err(ActivityError::validation(format!(
                "product not found: {missing}"
            )));
        }

        tracing::info!(items = input.items.len(), "Products reserved");
        Ok(Value::Bool(true))
    }

    // Products carry no stock, so releasing has nothing to undo.
    async fn release_products(&self, input: ProductsInput) -> Result<Value, ActivityError> {
        tracing::info!(items = ?input.items, "Releasing products reservation");
        Ok(Value::Bool(true))
    }
}

#[async_trait]
impl<S: Store, N: Notifier> ActivityExecutor for ServiceActivities<S, N> {
    #[tracing::instrument(
        skip(self, request),
        fields(activity = %request.activity, saga_id = %request.saga_id)
    )]
    async fn execute(&self, request: ActivityRequest) -> Result<Value, ActivityError> {
        match request.activity {
            Activity::ReserveProducts => self.reserve_products(request.input()?).await,
            Activity::ReleaseProducts => self.release_products(request.input()?).await,
            Activity::ProcessPayment => {
                let input: PaymentInput = request.input()?;
                self.accounts
                    .charge(input.user_id, input.amount, Some(request.idempotency_key))
                    .await?;
                Ok(Value::Bool(true))
            }
            Activity::RefundPayment => {
                let input: PaymentInput = request.input()?;
                self.accounts
                    .refund(input.user_id, input.amount, Some(request.idempotency_key))
                    .await?;
                Ok(Value::Bool(true))
            }
            Activity::SendOrderCreatedNotification => {
                let input: NotificationInput = request.input()?;
                self.notifier
                    .order_created(input.user_id, input.order_id)
                    .await
                    .map_err(ActivityError::transient)?;
                Ok(Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ErrorClass, UserId};
    use domain::Money;
    use saga::SagaItem;
    use serde_json::json;
    use store::InMemoryStore;

    use crate::notifier::RecordingNotifier;

    fn activities() -> (
        ServiceActivities<InMemoryStore, RecordingNotifier>,
        AccountAppService<InMemoryStore>,
    ) {
        let store = InMemoryStore::new();
        let activities = ServiceActivities::new(store.clone(), Arc::new(RecordingNotifier::new()));
        (activities, AccountAppService::new(store))
    }

    #[tokio::test]
    async fn test_unknown_product_is_a_validation_failure() {
        let (activities, _) = activities();
        let input = ProductsInput {
            items: vec![SagaItem {
                product_id: ProductId::new(),
                quantity: 1,
            }],
        };
        let request = ActivityRequest::new(
            Activity::ReserveProducts,
            "order_1",
            serde_json::to_value(input).unwrap(),
        );

        let err = activities.execute(request).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::Validation);
    }

    #[tokio::test]
    async fn test_payment_reinvocation_charges_once() {
        let (activities, accounts) = activities();
        let user_id = UserId::new();
        accounts
            .create_account(user_id, Money::new(150))
            .await
            .unwrap();
        let input = json!({ "user_id": user_id, "amount": 100 });

        for _ in 0..2 {
            let request = ActivityRequest::new(Activity::ProcessPayment, "order_1", input.clone());
            assert_eq!(activities.execute(request).await.unwrap(), json!(true));
        }

        let account = accounts.get_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.balance, Money::new(50));
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_a_conflict() {
        let (activities, accounts) = activities();
        let user_id = UserId::new();
        accounts.create_account(user_id, Money::new(10)).await.unwrap();

        let request = ActivityRequest::new(
            Activity::ProcessPayment,
            "order_1",
            json!({ "user_id": user_id, "amount": 100 }),
        );
        let err = activities.execute(request).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::Conflict);
        assert!(!err.is_retriable());
    }
}
