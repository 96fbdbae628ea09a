//! Delivery of customer-facing notifications.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{OrderId, UserId};

/// Sends the order-created notification to a customer.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn order_created(&self, user_id: UserId, order_id: OrderId) -> Result<(), String>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_created(&self, user_id: UserId, order_id: OrderId) -> Result<(), String> {
        tracing::info!(%user_id, %order_id, "Sending order created notification");
        Ok(())
    }
}

/// Keeps every notification in memory for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(UserId, OrderId)>>>,
    fail: Arc<Mutex<Option<String>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(UserId, OrderId)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Makes every further send fail with the given message.
    pub fn set_fail(&self, message: Option<String>) {
        *self
            .fail
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = message;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn order_created(&self, user_id: UserId, order_id: OrderId) -> Result<(), String> {
        let failure = self
            .fail
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(message) = failure {
            return Err(message);
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((user_id, order_id));
        Ok(())
    }
}
