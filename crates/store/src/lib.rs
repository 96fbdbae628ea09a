//! Persistent store for the order fulfillment services.
//!
//! Every read and write goes through a unit of work: a transaction opened by
//! a [`Store`] backend, handed to a closure as a [`RepositoryProvider`], and
//! committed only if the closure succeeds. [`LockingUnitOfWork`] additionally
//! serializes units of work that name the same locks.

pub mod error;
pub mod idempotency;
pub mod lock;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod provider;
pub mod saga_log;
pub mod uow;

pub use error::{Result, StoreError};
pub use idempotency::IdempotencyRepository;
pub use lock::{LockGuard, LockManager, canonical_lock_names};
pub use memory::InMemoryStore;
pub use outbox::{NewOutboxEvent, OutboxEvent, OutboxRepository};
pub use postgres::PostgresStore;
pub use provider::{
    AccountRepository, LocalProductRepository, LocalUserRepository, NotificationRepository,
    OrderRepository, RepositoryProvider,
};
pub use saga_log::{SagaLogRepository, SagaRecord};
pub use uow::{LockingUnitOfWork, Store, Transaction, UnitOfWork, Work};
