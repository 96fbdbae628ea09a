//! Outbox dispatcher.

use std::sync::Arc;
use std::time::Duration;

use store::{Store, StoreError, UnitOfWork};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::{Delivery, Transport};

/// Polling configuration for [`OutboxDispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    /// Maximum number of events published per pass.
    pub batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 100,
        }
    }
}

/// Publishes unpublished outbox rows in creation order.
///
/// A row is marked published only after the transport acknowledged it. A
/// crash or failed commit after publishing leaves the row unpublished, so it
/// is sent again on the next pass with the same message id.
pub struct OutboxDispatcher<S: Store, T: Transport> {
    uow: UnitOfWork<S>,
    transport: Arc<T>,
    config: DispatcherConfig,
}

impl<S: Store, T: Transport> OutboxDispatcher<S, T> {
    pub fn new(store: S, transport: Arc<T>, config: DispatcherConfig) -> Self {
        Self {
            uow: UnitOfWork::new(store),
            transport,
            config,
        }
    }

    /// Runs one pass and returns how many events were published.
    ///
    /// The pass stops at the first publish failure so later events never
    /// overtake an earlier one.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch_pending(&self) -> Result<usize, StoreError> {
        let transport = Arc::clone(&self.transport);
        let batch_size = self.config.batch_size;

        self.uow
            .execute(move |repos| {
                Box::pin(async move {
                    let events = repos.outbox().fetch_unpublished(batch_size).await?;
                    let mut published = 0;

                    for event in events {
                        let delivery = Delivery::from_outbox(&event)?;
                        match transport.publish(delivery).await {
                            Ok(()) => {
                                repos.outbox().mark_published(event.event_id).await?;
                                metrics::counter!("outbox_published_total").increment(1);
                                tracing::debug!(
                                    event_id = %event.event_id,
                                    event_type = %event.event_type,
                                    "Outbox event published"
                                );
                                published += 1;
                            }
                            Err(e) => {
                                metrics::counter!("outbox_publish_failures_total").increment(1);
                                tracing::warn!(
                                    event_id = %event.event_id,
                                    sequence = event.sequence,
                                    error = %e,
                                    "Outbox publish failed, will retry next pass"
                                );
                                break;
                            }
                        }
                    }

                    Ok::<_, StoreError>(published)
                })
            })
            .await
    }

    /// Polls the outbox until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox dispatcher started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.dispatch_pending().await {
                        Ok(0) => {}
                        Ok(count) => tracing::info!(count, "Dispatched outbox events"),
                        Err(e) => tracing::error!(error = %e, "Outbox pass failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Outbox dispatcher stopped");
    }
}
