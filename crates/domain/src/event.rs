//! Domain event trait.

use serde_json::Value;

/// A fact that happened in the domain and must be announced to other services.
///
/// The payload uses the wire field names other services consume, so it can
/// be written to the outbox unchanged.
pub trait DomainEvent: Send + Sync {
    /// Returns the wire type tag, e.g. `order_created`.
    fn event_type(&self) -> &'static str;

    /// Returns the routing key the event is published under, e.g. `order.created`.
    fn routing_key(&self) -> &'static str;

    /// Returns the JSON body of the event.
    fn payload(&self) -> serde_json::Result<Value>;
}
