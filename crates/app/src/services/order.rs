//! Order application service.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use domain::{DomainError, Order, OrderItem};
use saga::order_fulfillment::{self, CreateOrderParams, SagaItem};
use saga::{ActivityExecutor, SagaError, SagaHooks, SagaInstance, SagaOrchestrator};
use store::outbox::append_event;
use store::{LockingUnitOfWork, NewOutboxEvent, Store, UnitOfWork};
use tokio::task::JoinHandle;

use crate::error::ServiceError;

/// The create-order saga as wired in this service.
pub type OrderSaga<S, E> = SagaOrchestrator<S, E, PaymentResultHandler<S>>;

pub fn order_lock(order_id: OrderId) -> String {
    format!("order_{order_id}")
}

/// A product and the quantity ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderCommand {
    pub user_id: UserId,
    pub items: Vec<RequestedItem>,
}

/// An order that was stored and whose saga is running.
#[derive(Debug)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    pub saga_id: String,
    /// Completes when the saga reaches a terminal step.
    pub saga: JoinHandle<saga::Result<SagaInstance>>,
}

/// Applies payment outcomes to orders.
///
/// This is how the saga drives order status. Applying an outcome the order
/// already reflects is a no-op, so a resumed saga can report it again.
pub struct PaymentResultHandler<S: Store> {
    luow: LockingUnitOfWork<S>,
}

impl<S: Store> PaymentResultHandler<S> {
    pub fn new(store: S) -> Self {
        Self {
            luow: LockingUnitOfWork::new(store),
        }
    }

    /// Marks the order paid or cancels it, under the order lock.
    pub async fn handle_payment_result(
        &self,
        order_id: OrderId,
        success: bool,
    ) -> Result<(), ServiceError> {
        if success {
            self.transition(order_id, None).await
        } else {
            self.transition(order_id, Some("Payment failed".to_string()))
                .await
        }
    }

    #[tracing::instrument(skip(self))]
    async fn transition(
        &self,
        order_id: OrderId,
        cancel_reason: Option<String>,
    ) -> Result<(), ServiceError> {
        self.luow
            .execute([order_lock(order_id)], move |repos| {
                Box::pin(async move {
                    let mut order = repos
                        .orders()
                        .find(order_id)
                        .await?
                        .ok_or(DomainError::OrderNotFound(order_id))?;

                    let event = match cancel_reason {
                        None => order.mark_as_paid(),
                        Some(reason) => order.cancel(reason),
                    }
                    .map_err(DomainError::from)?;

                    match event {
                        Some(event) => {
                            repos.orders().store(&order).await?;
                            append_event(repos.outbox(), &event).await?;
                            tracing::info!(
                                %order_id,
                                status = %order.status(),
                                "Order status changed"
                            );
                        }
                        None => {
                            tracing::debug!(
                                %order_id,
                                status = %order.status(),
                                "Order already in target status"
                            );
                        }
                    }
                    Ok::<_, ServiceError>(())
                })
            })
            .await
    }
}

#[async_trait]
impl<S: Store> SagaHooks for PaymentResultHandler<S> {
    async fn payment_succeeded(&self, order_id: OrderId) -> Result<(), SagaError> {
        self.transition(order_id, None)
            .await
            .map_err(|e| SagaError::Hook(e.to_string()))
    }

    async fn payment_failed(&self, order_id: OrderId, reason: &str) -> Result<(), SagaError> {
        self.transition(order_id, Some(reason.to_string()))
            .await
            .map_err(|e| SagaError::Hook(e.to_string()))
    }
}

/// Creates orders and hands them to the create-order saga.
pub struct OrderAppService<S: Store, E: ActivityExecutor> {
    uow: UnitOfWork<S>,
    payments: PaymentResultHandler<S>,
    saga: OrderSaga<S, E>,
}

impl<S: Store, E: ActivityExecutor> OrderAppService<S, E> {
    pub fn new(store: S, saga: OrderSaga<S, E>) -> Self {
        Self {
            uow: UnitOfWork::new(store.clone()),
            payments: PaymentResultHandler::new(store),
            saga,
        }
    }

    pub fn saga(&self) -> &OrderSaga<S, E> {
        &self.saga
    }

    /// Creates an order priced from the local product cache.
    ///
    /// The order, its `order_created` event and the saga record are written
    /// in one unit of work; the saga starts running once that commits.
    #[tracing::instrument(skip(self, command), fields(user_id = %command.user_id))]
    pub async fn create_order(
        &self,
        command: CreateOrderCommand,
    ) -> Result<PlacedOrder, ServiceError> {
        if command.items.is_empty() {
            return Err(ServiceError::BadRequest("order has no items".to_string()));
        }

        let order_id = OrderId::new();
        let saga_id = order_fulfillment::saga_id(order_id);
        let saga = self.saga.clone();
        let id = saga_id.clone();

        let order = self
            .uow
            .execute(move |repos| {
                Box::pin(async move {
                    let user_id = command.user_id;
                    repos
                        .local_users()
                        .find(user_id)
                        .await?
                        .ok_or(DomainError::UserNotFound(user_id))?;

                    let product_ids: Vec<ProductId> =
                        command.items.iter().map(|item| item.product_id).collect();
                    let prices: HashMap<ProductId, _> = repos
                        .local_products()
                        .find_many(&product_ids)
                        .await?
                        .into_iter()
                        .map(|product| (product.product_id, product.price))
                        .collect();

                    let items = command
                        .items
                        .iter()
                        .map(|item| {
                            prices
                                .get(&item.product_id)
                                .map(|price| OrderItem::new(item.product_id, item.quantity, *price))
                                .ok_or(DomainError::ProductNotFound(item.product_id))
                        })
                        .collect::<Result<Vec<_>, _>>()?;

                    let (order, event) =
                        Order::create(order_id, user_id, items).map_err(DomainError::from)?;
                    repos.orders().store(&order).await?;
                    repos
                        .outbox()
                        .append(NewOutboxEvent::from_event(&event)?.with_correlation_id(id.clone()))
                        .await?;

                    let params = CreateOrderParams {
                        order_id,
                        user_id,
                        items: order
                            .items()
                            .iter()
                            .map(|item| SagaItem {
                                product_id: item.product_id,
                                quantity: item.quantity,
                            })
                            .collect(),
                        total_price: order.total_price(),
                    };
                    saga.start_in(repos, &id, params).await?;
                    Ok::<_, ServiceError>(order)
                })
            })
            .await?;

        tracing::info!(%order_id, total_price = %order.total_price(), "Order created");
        let handle = self.saga.spawn(&saga_id);
        Ok(PlacedOrder {
            order_id,
            saga_id,
            saga: handle,
        })
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, ServiceError> {
        self.uow
            .execute(move |repos| {
                Box::pin(async move { Ok::<_, ServiceError>(repos.orders().find(order_id).await?) })
            })
            .await
    }

    pub async fn get_saga(&self, order_id: OrderId) -> Result<Option<SagaInstance>, ServiceError> {
        Ok(self
            .saga
            .get_saga(&order_fulfillment::saga_id(order_id))
            .await?)
    }

    pub async fn handle_payment_result(
        &self,
        order_id: OrderId,
        success: bool,
    ) -> Result<(), ServiceError> {
        self.payments.handle_payment_result(order_id, success).await
    }
}
