//! Reliable event propagation.
//!
//! Producers append events to the outbox inside their unit of work; the
//! [`OutboxDispatcher`] publishes them through a [`Transport`] at least once;
//! an [`EventConsumer`] applies each delivery to the local store exactly once
//! in effect, guarded by the idempotency store.

pub mod broker;
pub mod consumer;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod payloads;
pub mod routing;
pub mod transport;

pub use broker::{DeadLetter, InMemoryBroker, QueueConsumer};
pub use consumer::{ConsumeOutcome, DeliveryHandler, EventConsumer, EventHandler};
pub use dispatcher::{DispatcherConfig, OutboxDispatcher};
pub use envelope::{CONTENT_TYPE, Delivery};
pub use error::{ConsumeError, TransportError};
pub use transport::Transport;

/// Exchange every service publishes its domain events to.
pub const DOMAIN_EVENT_EXCHANGE: &str = "domain_event_exchange";
