//! Repository traits and the provider that hands them out inside a transaction.

use async_trait::async_trait;
use common::{OrderId, ProductId, UserId};
use domain::{Account, LocalProduct, LocalUser, Notification, Order};

use crate::Result;
use crate::idempotency::IdempotencyRepository;
use crate::outbox::OutboxRepository;
use crate::saga_log::SagaLogRepository;

#[async_trait]
pub trait OrderRepository: Send {
    /// Inserts or replaces an order.
    async fn store(&mut self, order: &Order) -> Result<()>;

    async fn find(&mut self, id: OrderId) -> Result<Option<Order>>;
}

#[async_trait]
pub trait AccountRepository: Send {
    /// Inserts or replaces an account.
    async fn store(&mut self, account: &Account) -> Result<()>;

    async fn find(&mut self, user_id: UserId) -> Result<Option<Account>>;
}

#[async_trait]
pub trait LocalUserRepository: Send {
    /// Upserts the projection.
    async fn store(&mut self, user: &LocalUser) -> Result<()>;

    async fn find(&mut self, user_id: UserId) -> Result<Option<LocalUser>>;
}

#[async_trait]
pub trait LocalProductRepository: Send {
    /// Upserts the projection.
    async fn store(&mut self, product: &LocalProduct) -> Result<()>;

    async fn find(&mut self, product_id: ProductId) -> Result<Option<LocalProduct>>;

    /// Returns the products that exist among `product_ids`, in no guaranteed order.
    async fn find_many(&mut self, product_ids: &[ProductId]) -> Result<Vec<LocalProduct>>;
}

#[async_trait]
pub trait NotificationRepository: Send {
    async fn store(&mut self, notification: &Notification) -> Result<()>;

    /// Returns the notifications of an order, oldest first.
    async fn find_by_order(&mut self, order_id: OrderId) -> Result<Vec<Notification>>;
}

/// Access to every repository participating in one transaction.
///
/// Writes made through any repository become visible to other units of work
/// only when the surrounding transaction commits.
pub trait RepositoryProvider: Send {
    fn orders(&mut self) -> &mut dyn OrderRepository;
    fn accounts(&mut self) -> &mut dyn AccountRepository;
    fn local_users(&mut self) -> &mut dyn LocalUserRepository;
    fn local_products(&mut self) -> &mut dyn LocalProductRepository;
    fn notifications(&mut self) -> &mut dyn NotificationRepository;
    fn outbox(&mut self) -> &mut dyn OutboxRepository;
    fn idempotency(&mut self) -> &mut dyn IdempotencyRepository;
    fn sagas(&mut self) -> &mut dyn SagaLogRepository;
}
