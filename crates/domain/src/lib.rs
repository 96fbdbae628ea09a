//! Domain layer for the order fulfillment services.
//!
//! Aggregates are plain structs whose command methods validate a transition,
//! mutate the aggregate and return the domain event describing the change.
//! Persisting the aggregate and announcing the event is the caller's job,
//! normally inside one unit of work so the two are atomic.

pub mod account;
pub mod error;
pub mod event;
pub mod local;
pub mod money;
pub mod notification;
pub mod order;

pub use account::{Account, AccountError, AccountEvent};
pub use error::{DomainError, Result};
pub use event::DomainEvent;
pub use local::{LocalProduct, LocalUser};
pub use money::Money;
pub use notification::Notification;
pub use order::{Order, OrderError, OrderEvent, OrderItem, OrderStatus};
