//! Idempotent event consumption.

use std::sync::Arc;

use async_trait::async_trait;
use store::{RepositoryProvider, Store, UnitOfWork};

use crate::{CONTENT_TYPE, ConsumeError, Delivery};

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The effect was applied and the message id recorded.
    Applied,
    /// The message id was already recorded; nothing was written.
    Duplicate,
    /// The delivery is not something this consumer handles.
    Skipped,
}

impl ConsumeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumeOutcome::Applied => "applied",
            ConsumeOutcome::Duplicate => "duplicate",
            ConsumeOutcome::Skipped => "skipped",
        }
    }
}

/// Decodes and applies one family of events.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Event: Send + 'static;

    /// Consumer name; scopes idempotency records.
    fn name(&self) -> &'static str;

    /// Decodes a delivery. `Ok(None)` means the type is not handled here.
    fn decode(&self, delivery: &Delivery) -> Result<Option<Self::Event>, ConsumeError>;

    /// Applies the effect inside the consumer's transaction.
    async fn apply(
        &self,
        repos: &mut dyn RepositoryProvider,
        event: Self::Event,
    ) -> Result<(), ConsumeError>;
}

/// Anything a broker queue can hand deliveries to.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumeError>;
}

/// Applies deliveries through an [`EventHandler`] at most once per message id.
///
/// The idempotency check, the effect and the idempotency record share one
/// unit of work, so a crash in between leaves the message unprocessed and a
/// redelivery applies it from scratch.
pub struct EventConsumer<S: Store, H: EventHandler> {
    uow: UnitOfWork<S>,
    handler: Arc<H>,
}

impl<S: Store, H: EventHandler> EventConsumer<S, H> {
    pub fn new(store: S, handler: H) -> Self {
        Self {
            uow: UnitOfWork::new(store),
            handler: Arc::new(handler),
        }
    }

    #[tracing::instrument(
        skip(self, delivery),
        fields(
            consumer = self.handler.name(),
            message_id = %delivery.message_id,
            event_type = %delivery.event_type
        )
    )]
    pub async fn consume(&self, delivery: &Delivery) -> Result<ConsumeOutcome, ConsumeError> {
        let outcome = self.consume_inner(delivery).await;
        let label = match &outcome {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "failed",
        };
        metrics::counter!(
            "consumer_messages_total",
            "consumer" => self.handler.name(),
            "outcome" => label
        )
        .increment(1);
        outcome
    }

    async fn consume_inner(&self, delivery: &Delivery) -> Result<ConsumeOutcome, ConsumeError> {
        if delivery.content_type != CONTENT_TYPE {
            tracing::warn!(
                content_type = %delivery.content_type,
                "Skipping delivery with unsupported content type"
            );
            return Ok(ConsumeOutcome::Skipped);
        }

        let Some(event) = self.handler.decode(delivery)? else {
            tracing::debug!("Skipping unhandled event type");
            return Ok(ConsumeOutcome::Skipped);
        };

        let consumer = self.handler.name();
        let message_id = delivery.message_id.clone();
        let handler = Arc::clone(&self.handler);

        let result = self
            .uow
            .execute(move |repos| {
                Box::pin(async move {
                    if repos.idempotency().is_processed(consumer, &message_id).await? {
                        return Ok(ConsumeOutcome::Duplicate);
                    }
                    handler.apply(repos, event).await?;
                    repos.idempotency().record(consumer, &message_id).await?;
                    Ok::<_, ConsumeError>(ConsumeOutcome::Applied)
                })
            })
            .await;

        match result {
            Ok(ConsumeOutcome::Duplicate) => {
                tracing::debug!("Delivery already processed");
                Ok(ConsumeOutcome::Duplicate)
            }
            Ok(outcome) => Ok(outcome),
            // A concurrent delivery of the same message recorded the key first.
            Err(ConsumeError::Store(e)) if e.is_conflict() => {
                tracing::debug!(error = %e, "Lost idempotency race to a concurrent delivery");
                Ok(ConsumeOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<S: Store, H: EventHandler> DeliveryHandler for EventConsumer<S, H> {
    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumeError> {
        self.consume(delivery).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::{USER_CREATED, UserPayload};
    use common::UserId;
    use domain::LocalUser;
    use store::InMemoryStore;

    struct UserHandler;

    #[async_trait]
    impl EventHandler for UserHandler {
        type Event = UserPayload;

        fn name(&self) -> &'static str {
            "test_users"
        }

        fn decode(&self, delivery: &Delivery) -> Result<Option<UserPayload>, ConsumeError> {
            match delivery.event_type.as_str() {
                USER_CREATED => delivery.decode_body().map(Some),
                _ => Ok(None),
            }
        }

        async fn apply(
            &self,
            repos: &mut dyn RepositoryProvider,
            event: UserPayload,
        ) -> Result<(), ConsumeError> {
            repos
                .local_users()
                .store(&LocalUser {
                    user_id: event.user_id,
                    login: event.login,
                    source_updated_at: event.updated_at,
                })
                .await?;
            Ok(())
        }
    }

    fn user_created(user_id: UserId) -> Delivery {
        let payload = UserPayload {
            user_id,
            login: "alice".to_string(),
            updated_at: None,
        };
        Delivery::json(USER_CREATED, "user.created", &payload).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_delivery_applies_once() {
        let store = InMemoryStore::new();
        let consumer = EventConsumer::new(store.clone(), UserHandler);
        let delivery = user_created(UserId::new());

        assert_eq!(consumer.consume(&delivery).await.unwrap(), ConsumeOutcome::Applied);
        let writes = store.write_commit_count();
        assert_eq!(consumer.consume(&delivery).await.unwrap(), ConsumeOutcome::Duplicate);
        assert_eq!(store.write_commit_count(), writes);
        assert_eq!(store.idempotency_record_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_type_is_skipped_without_writes() {
        let store = InMemoryStore::new();
        let consumer = EventConsumer::new(store.clone(), UserHandler);
        let mut delivery = user_created(UserId::new());
        delivery.event_type = "user_deleted".to_string();

        assert_eq!(consumer.consume(&delivery).await.unwrap(), ConsumeOutcome::Skipped);
        assert_eq!(store.write_commit_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_skipped() {
        let store = InMemoryStore::new();
        let consumer = EventConsumer::new(store.clone(), UserHandler);
        let mut delivery = user_created(UserId::new());
        delivery.content_type = "text/plain".to_string();

        assert_eq!(consumer.consume(&delivery).await.unwrap(), ConsumeOutcome::Skipped);
        assert_eq!(store.write_commit_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_permanent_error() {
        let store = InMemoryStore::new();
        let consumer = EventConsumer::new(store.clone(), UserHandler);
        let mut delivery = user_created(UserId::new());
        delivery.body = br#"{"user_id": "zzz", "login": "x"}"#.to_vec();

        let err = consumer.consume(&delivery).await.unwrap_err();
        assert!(!err.is_retriable());
        assert_eq!(store.write_commit_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_message_unprocessed() {
        let store = InMemoryStore::new();
        let consumer = EventConsumer::new(store.clone(), UserHandler);
        let delivery = user_created(UserId::new());

        store.set_fail_on_commit(true);
        let err = consumer.consume(&delivery).await.unwrap_err();
        assert!(err.is_retriable());

        store.set_fail_on_commit(false);
        assert_eq!(consumer.consume(&delivery).await.unwrap(), ConsumeOutcome::Applied);
    }
}
