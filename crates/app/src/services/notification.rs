//! Customer notifications.

use domain::Notification;
use store::{RepositoryProvider, StoreError};

/// Records the notifications derived from order events.
///
/// Runs inside the consuming unit of work.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationService;

impl NotificationService {
    pub async fn create_notification(
        &self,
        repos: &mut dyn RepositoryProvider,
        notification: Notification,
    ) -> Result<(), StoreError> {
        tracing::info!(
            order_id = %notification.order_id,
            message = %notification.message,
            "Notification created"
        );
        repos.notifications().store(&notification).await
    }
}
