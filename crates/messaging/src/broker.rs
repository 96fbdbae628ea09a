//! In-process topic broker.
//!
//! Models the parts of an AMQP topic exchange the services rely on: durable
//! queues bound by routing-key patterns, at-least-once delivery with
//! redelivery of transient failures, and a dead-letter list for messages
//! that cannot be processed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, watch};

use crate::{Delivery, DeliveryHandler, Transport, TransportError, routing};

/// A message removed from its queue without being processed.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub queue: String,
    pub delivery: Delivery,
    pub reason: String,
}

struct QueueState {
    patterns: Vec<String>,
    messages: VecDeque<Delivery>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    dead_letters: Vec<DeadLetter>,
    fail_next_publishes: u32,
    lose_next_acks: u32,
}

/// A topic exchange with durable queues, shared by cloning.
#[derive(Clone)]
pub struct InMemoryBroker {
    exchange: String,
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Declares a queue and binds it to the given patterns.
    ///
    /// Declaring an existing queue adds the new bindings and keeps its
    /// messages.
    pub async fn declare_queue(&self, name: &str, patterns: &[&str]) {
        let mut state = self.state.lock().await;
        let queue = state
            .queues
            .entry(name.to_string())
            .or_insert_with(|| QueueState {
                patterns: Vec::new(),
                messages: VecDeque::new(),
                notify: Arc::new(Notify::new()),
            });
        for pattern in patterns {
            if !queue.patterns.iter().any(|p| p == pattern) {
                queue.patterns.push(pattern.to_string());
            }
        }
        tracing::info!(
            exchange = %self.exchange,
            queue = name,
            patterns = ?patterns,
            "Queue declared"
        );
    }

    /// Number of messages waiting in a queue.
    pub async fn queue_depth(&self, name: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(name)
            .map_or(0, |q| q.messages.len())
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Makes the next `count` publishes fail without routing the message.
    pub async fn fail_next_publishes(&self, count: u32) {
        self.state.lock().await.fail_next_publishes = count;
    }

    /// Routes the next `count` publishes but reports them as unacknowledged.
    pub async fn lose_next_acks(&self, count: u32) {
        self.state.lock().await.lose_next_acks = count;
    }

    /// Creates a consumer that hands messages of `queue` to `handler`.
    pub fn consumer<H: DeliveryHandler>(
        &self,
        queue: &str,
        handler: Arc<H>,
        max_redeliveries: u32,
    ) -> QueueConsumer<H> {
        QueueConsumer {
            broker: self.clone(),
            queue: queue.to_string(),
            handler,
            max_redeliveries,
        }
    }

    async fn pop(&self, queue: &str) -> Option<Delivery> {
        self.state
            .lock()
            .await
            .queues
            .get_mut(queue)
            .and_then(|q| q.messages.pop_front())
    }

    async fn notifier(&self, queue: &str) -> Option<Arc<Notify>> {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| Arc::clone(&q.notify))
    }

    async fn requeue(&self, queue: &str, delivery: Delivery) {
        let mut state = self.state.lock().await;
        if let Some(q) = state.queues.get_mut(queue) {
            q.messages.push_back(delivery);
            q.notify.notify_one();
        }
    }

    async fn dead_letter(&self, queue: &str, delivery: Delivery, reason: String) {
        self.state.lock().await.dead_letters.push(DeadLetter {
            queue: queue.to_string(),
            delivery,
            reason,
        });
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn publish(&self, delivery: Delivery) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.fail_next_publishes > 0 {
            state.fail_next_publishes -= 1;
            return Err(TransportError::Unavailable(format!(
                "exchange {} unreachable",
                self.exchange
            )));
        }

        let mut routed = 0;
        for queue in state.queues.values_mut() {
            if queue
                .patterns
                .iter()
                .any(|p| routing::matches(p, &delivery.routing_key))
            {
                queue.messages.push_back(delivery.clone());
                queue.notify.notify_one();
                routed += 1;
            }
        }
        if routed == 0 {
            tracing::debug!(routing_key = %delivery.routing_key, "Message unroutable, dropped");
        }

        if state.lose_next_acks > 0 {
            state.lose_next_acks -= 1;
            return Err(TransportError::NotAcknowledged(delivery.message_id));
        }
        Ok(())
    }
}

/// Delivers the messages of one queue to a handler.
pub struct QueueConsumer<H: DeliveryHandler> {
    broker: InMemoryBroker,
    queue: String,
    handler: Arc<H>,
    max_redeliveries: u32,
}

impl<H: DeliveryHandler> QueueConsumer<H> {
    /// Processes deliveries until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(queue = %self.queue, "Consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Some(delivery) = self.broker.pop(&self.queue).await {
                self.process(delivery).await;
                continue;
            }
            let Some(notify) = self.broker.notifier(&self.queue).await else {
                tracing::error!(queue = %self.queue, "Queue is not declared");
                break;
            };
            tokio::select! {
                _ = notify.notified() => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(queue = %self.queue, "Consumer stopped");
    }

    /// Processes deliveries until the queue is empty; returns how many were
    /// handed to the handler.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while let Some(delivery) = self.broker.pop(&self.queue).await {
            self.process(delivery).await;
            processed += 1;
        }
        processed
    }

    async fn process(&self, mut delivery: Delivery) {
        match self.handler.handle(&delivery).await {
            Ok(()) => {}
            Err(e) if e.is_retriable() && delivery.redelivery_count < self.max_redeliveries => {
                tracing::warn!(
                    queue = %self.queue,
                    message_id = %delivery.message_id,
                    redelivery = delivery.redelivery_count + 1,
                    error = %e,
                    "Requeueing delivery"
                );
                delivery.redelivery_count += 1;
                self.broker.requeue(&self.queue, delivery).await;
            }
            Err(e) => {
                tracing::error!(
                    queue = %self.queue,
                    message_id = %delivery.message_id,
                    class = %e.class(),
                    error = %e,
                    "Dead-lettering delivery"
                );
                self.broker
                    .dead_letter(&self.queue, delivery, e.to_string())
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConsumeError;
    use common::ErrorClass;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
        class: ErrorClass,
    }

    #[async_trait]
    impl DeliveryHandler for Flaky {
        async fn handle(&self, _delivery: &Delivery) -> Result<(), ConsumeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(ConsumeError::Handler {
                    class: self.class,
                    message: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    fn delivery(routing_key: &str) -> Delivery {
        Delivery::json("order_created", routing_key, &json!({})).unwrap()
    }

    #[tokio::test]
    async fn test_routes_by_pattern_and_retains_without_consumer() {
        let broker = InMemoryBroker::new("ex");
        broker.declare_queue("orders", &["order.*"]).await;
        broker.declare_queue("users", &["user.*"]).await;

        broker.publish(delivery("order.created")).await.unwrap();
        broker.publish(delivery("product.created")).await.unwrap();

        assert_eq!(broker.queue_depth("orders").await, 1);
        assert_eq!(broker.queue_depth("users").await, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_redelivered() {
        let broker = InMemoryBroker::new("ex");
        broker.declare_queue("q", &["#"]).await;
        let handler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 2,
            class: ErrorClass::Transient,
        });
        broker.publish(delivery("a.b")).await.unwrap();

        let consumer = broker.consumer("q", Arc::clone(&handler), 5);
        assert_eq!(consumer.drain().await, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(broker.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_redeliveries_are_dead_lettered() {
        let broker = InMemoryBroker::new("ex");
        broker.declare_queue("q", &["#"]).await;
        let handler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            class: ErrorClass::Timeout,
        });
        broker.publish(delivery("a.b")).await.unwrap();

        broker.consumer("q", Arc::clone(&handler), 2).drain().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let dead = broker.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].delivery.redelivery_count, 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dead_lettered_immediately() {
        let broker = InMemoryBroker::new("ex");
        broker.declare_queue("q", &["#"]).await;
        let handler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 1,
            class: ErrorClass::Validation,
        });
        broker.publish(delivery("a.b")).await.unwrap();

        broker.consumer("q", Arc::clone(&handler), 5).drain().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.dead_letters().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let broker = InMemoryBroker::new("ex");
        broker.declare_queue("q", &["#"]).await;
        let handler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 0,
            class: ErrorClass::Transient,
        });
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(broker.consumer("q", Arc::clone(&handler), 0).run(rx));

        broker.publish(delivery("a.b")).await.unwrap();
        while broker.queue_depth("q").await > 0 || handler.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
