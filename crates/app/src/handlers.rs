//! Event consumers of the order and notification services.

use async_trait::async_trait;
use domain::{LocalProduct, LocalUser, Notification};
use messaging::payloads::{
    ORDER_CANCELLED, ORDER_CREATED, ORDER_PAID, OrderCancelledPayload, OrderCreatedPayload,
    OrderPaidPayload, PRODUCT_CREATED, PRODUCT_UPDATED, ProductPayload, USER_CREATED,
    USER_UPDATED, UserPayload,
};
use messaging::{ConsumeError, Delivery, EventHandler};
use store::RepositoryProvider;

use crate::services::{DataSyncService, NotificationService};

pub const ORDER_EVENTS_QUEUE: &str = "order_events";
pub const ORDER_EVENTS_BINDINGS: &[&str] = &["user.*", "product.*"];

pub const NOTIFICATION_EVENTS_QUEUE: &str = "notification_events";
pub const NOTIFICATION_EVENTS_BINDINGS: &[&str] = &["order.*"];

/// A projection update for the order service caches.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    User(LocalUser),
    Product(LocalProduct),
}

/// Keeps the local user and product caches in sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderEventsHandler {
    sync: DataSyncService,
}

impl OrderEventsHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventHandler for OrderEventsHandler {
    type Event = SyncEvent;

    fn name(&self) -> &'static str {
        "order_service"
    }

    fn decode(&self, delivery: &Delivery) -> Result<Option<SyncEvent>, ConsumeError> {
        match delivery.event_type.as_str() {
            USER_CREATED | USER_UPDATED => {
                let payload: UserPayload = delivery.decode_body()?;
                Ok(Some(SyncEvent::User(LocalUser {
                    user_id: payload.user_id,
                    login: payload.login,
                    source_updated_at: payload.updated_at,
                })))
            }
            PRODUCT_CREATED | PRODUCT_UPDATED => {
                let payload: ProductPayload = delivery.decode_body()?;
                if payload.price.is_negative() {
                    return Err(ConsumeError::Validation(format!(
                        "product {} has negative price {}",
                        payload.product_id, payload.price
                    )));
                }
                Ok(Some(SyncEvent::Product(LocalProduct {
                    product_id: payload.product_id,
                    name: payload.name,
                    price: payload.price,
                    source_updated_at: payload.updated_at,
                })))
            }
            _ => Ok(None),
        }
    }

    async fn apply(
        &self,
        repos: &mut dyn RepositoryProvider,
        event: SyncEvent,
    ) -> Result<(), ConsumeError> {
        match event {
            SyncEvent::User(user) => self.sync.sync_user(repos, user).await?,
            SyncEvent::Product(product) => self.sync.sync_product(repos, product).await?,
        };
        Ok(())
    }
}

/// Turns order events into customer notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationEventsHandler {
    notifications: NotificationService,
}

impl NotificationEventsHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventHandler for NotificationEventsHandler {
    type Event = Notification;

    fn name(&self) -> &'static str {
        "notification_service"
    }

    fn decode(&self, delivery: &Delivery) -> Result<Option<Notification>, ConsumeError> {
        let notification = match delivery.event_type.as_str() {
            ORDER_CREATED => {
                let payload: OrderCreatedPayload = delivery.decode_body()?;
                Notification::order_created(payload.order_id, Some(payload.user_id))
            }
            ORDER_PAID => {
                let payload: OrderPaidPayload = delivery.decode_body()?;
                Notification::order_paid(payload.order_id)
            }
            ORDER_CANCELLED => {
                let payload: OrderCancelledPayload = delivery.decode_body()?;
                Notification::order_cancelled(payload.order_id, &payload.reason)
            }
            _ => return Ok(None),
        };
        Ok(Some(notification))
    }

    async fn apply(
        &self,
        repos: &mut dyn RepositoryProvider,
        notification: Notification,
    ) -> Result<(), ConsumeError> {
        self.notifications
            .create_notification(repos, notification)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;
    use messaging::{ConsumeOutcome, EventConsumer};
    use serde_json::json;
    use store::{InMemoryStore, StoreError, UnitOfWork};

    #[tokio::test]
    async fn test_product_created_updates_cache() {
        let store = InMemoryStore::new();
        let consumer = EventConsumer::new(store.clone(), OrderEventsHandler::new());
        let product_id = ProductId::new();
        let delivery = Delivery::json(
            PRODUCT_CREATED,
            "product.created",
            &json!({ "product_id": product_id, "name": "Widget", "price": 100 }),
        )
        .unwrap();

        assert_eq!(
            consumer.consume(&delivery).await.unwrap(),
            ConsumeOutcome::Applied
        );

        let cached = UnitOfWork::new(store)
            .execute(move |repos| {
                Box::pin(async move { repos.local_products().find(product_id).await })
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.name, "Widget");
        assert_eq!(cached.price, domain::Money::new(100));
    }

    #[tokio::test]
    async fn test_malformed_user_is_permanent() {
        let consumer = EventConsumer::new(InMemoryStore::new(), OrderEventsHandler::new());
        let delivery = Delivery::json(
            USER_CREATED,
            "user.created",
            &json!({ "user_id": "not-a-uuid", "login": "alice" }),
        )
        .unwrap();

        let err = consumer.consume(&delivery).await.unwrap_err();
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_order_cancelled_creates_notification() {
        let store = InMemoryStore::new();
        let consumer = EventConsumer::new(store.clone(), NotificationEventsHandler::new());
        let order_id = common::OrderId::new();
        let delivery = Delivery::json(
            ORDER_CANCELLED,
            "order.cancelled",
            &json!({ "order_id": order_id, "reason": "Payment failed" }),
        )
        .unwrap();

        consumer.consume(&delivery).await.unwrap();

        let notifications = UnitOfWork::new(store)
            .execute(move |repos| {
                Box::pin(async move {
                    Ok::<_, StoreError>(repos.notifications().find_by_order(order_id).await?)
                })
            })
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].message.contains("Payment failed"));
        assert!(notifications[0].user_id.is_none());
    }
}
