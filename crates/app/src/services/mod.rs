//! Application services.

pub mod account;
pub mod data_sync;
pub mod notification;
pub mod order;

pub use account::{ACCOUNT_IDEMPOTENCY_SCOPE, AccountAppService, account_lock};
pub use data_sync::DataSyncService;
pub use notification::NotificationService;
pub use order::{
    CreateOrderCommand, OrderAppService, OrderSaga, PaymentResultHandler, PlacedOrder,
    RequestedItem, order_lock,
};
