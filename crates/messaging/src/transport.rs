use async_trait::async_trait;

use crate::{Delivery, TransportError};

/// Publishes deliveries to a message broker.
///
/// Returning `Ok` means the broker acknowledged the message. An error does
/// not prove the message was dropped; callers must be prepared to publish it
/// again.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn publish(&self, delivery: Delivery) -> Result<(), TransportError>;
}
