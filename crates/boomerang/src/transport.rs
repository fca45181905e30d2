//! The broker-transport seam.
//!
//! Connections, channels, and exchange/queue topology are an external
//! collaborator's business. The engine only needs three operations: publish a
//! message, acknowledge a delivery, and reject a delivery (with the broker's
//! dead-letter routing taking over when requeue is false).

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

use crate::error::TransportError;

/// Header the transport stamps with the original publish time (unix ms).
/// Transports using a different native key normalise it when building the
/// [`Delivery`].
pub const PUBLISHED_AT_MS: &str = "x-published-at-ms";

/// Best-effort annotation written before a message is finally rejected.
pub const DLQ_REASON: &str = "x-dlq-reason";

/// One in-flight message as handed to the engine by the consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Raw message payload.
    pub body: Bytes,
    /// Where the message was originally routed; retries republish here.
    pub destination: String,
    /// String-valued message headers.
    pub headers: HashMap<String, String>,
}

impl Delivery {
    pub fn new(destination: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            destination: destination.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Operations the engine needs from the broker transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `body` to `destination` with the given headers.
    async fn publish(
        &self,
        destination: &str,
        body: Bytes,
        headers: HashMap<String, String>,
    ) -> Result<(), TransportError>;

    /// Acknowledge a delivery, removing it from the broker.
    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Reject a delivery. With `requeue = false` the broker's dead-letter
    /// routing applies.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_builder() {
        let delivery = Delivery::new("orders.created", &b"{}"[..])
            .with_headers(HashMap::from([("x-tenant".to_string(), "acme".to_string())]));
        assert_eq!(delivery.destination, "orders.created");
        assert_eq!(delivery.headers.get("x-tenant").map(String::as_str), Some("acme"));
    }
}
