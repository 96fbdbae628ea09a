//! Durable saga orchestration for order creation.
//!
//! The create-order saga runs three activities in order:
//! 1. Reserve products
//! 2. Process payment
//! 3. Send the order-created notification
//!
//! Every transition is persisted to the saga log before the next activity
//! starts, so a restarted process resumes where the previous one stopped.
//! When payment fails, the reservation is released before the saga ends
//! as failed. A failed notification does not undo anything.

pub mod activity;
pub mod aggregate;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod hooks;
pub mod order_fulfillment;
pub mod policy;
pub mod scripted;
pub mod state;

pub use activity::{Activity, ActivityError, ActivityExecutor, ActivityRequest};
pub use aggregate::{PendingCompensation, SagaFailure, SagaInstance};
pub use coordinator::{SagaOptions, SagaOrchestrator};
pub use error::{Result, SagaError};
pub use events::SagaEvent;
pub use hooks::{NoopHooks, SagaHooks};
pub use order_fulfillment::{CreateOrderParams, SagaItem};
pub use policy::{ActivityOptions, RetryPolicy};
pub use scripted::ScriptedActivities;
pub use state::SagaStep;
