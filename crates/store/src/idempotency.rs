//! Idempotency records for at-least-once consumers.

use async_trait::async_trait;

use crate::Result;

/// Tracks `(consumer, message_id)` pairs that have already been applied.
#[async_trait]
pub trait IdempotencyRepository: Send {
    async fn is_processed(&mut self, consumer: &str, message_id: &str) -> Result<bool>;

    /// Records a key in the current transaction.
    ///
    /// If another transaction records the same key first, the commit of this
    /// one fails with [`StoreError::Conflict`](crate::StoreError::Conflict).
    async fn record(&mut self, consumer: &str, message_id: &str) -> Result<()>;
}
