//! Callbacks the saga invokes around payment.

use async_trait::async_trait;
use common::OrderId;

use crate::error::SagaError;

/// Reacts to the payment outcome of a saga.
///
/// Hooks run before the corresponding transition is persisted. A saga that
/// is resumed after a crash can therefore invoke the same hook again, so
/// implementations must be idempotent.
#[async_trait]
pub trait SagaHooks: Send + Sync + 'static {
    /// Payment succeeded; the order should become paid.
    async fn payment_succeeded(&self, _order_id: OrderId) -> Result<(), SagaError> {
        Ok(())
    }

    /// Payment failed and compensation ran; the order should be cancelled.
    async fn payment_failed(&self, _order_id: OrderId, _reason: &str) -> Result<(), SagaError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SagaHooks for NoopHooks {}
