//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the retry engine.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! metric, labelled so operators can break decisions down by error kind and
//! dead-letter reason.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Final disposition of one delivery attempt.
#[derive(Debug, Clone, Copy)]
pub enum DeliveryStatus {
    Succeeded,
    Retried,
    DeadLettered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Succeeded => "succeeded",
            DeliveryStatus::Retried => "retried",
            DeliveryStatus::DeadLettered => "dead_lettered",
        }
    }
}

/// Event emitted when a delivery attempt reaches a final disposition.
pub struct DeliveryProcessed {
    pub status: DeliveryStatus,
}

impl InternalEvent for DeliveryProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Delivery processed");
        counter!("boomerang_deliveries_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted when a handler invocation fails.
pub struct HandlerFailed {
    pub kind: String,
}

impl InternalEvent for HandlerFailed {
    fn emit(self) {
        trace!(kind = %self.kind, "Handler failed");
        counter!("boomerang_handler_failures_total", "kind" => self.kind).increment(1);
    }
}

/// Event emitted when a retry is scheduled.
pub struct RetryScheduled {
    pub attempt: u32,
    pub delay: Duration,
}

impl InternalEvent for RetryScheduled {
    fn emit(self) {
        trace!(
            attempt = self.attempt,
            delay_ms = self.delay.as_millis(),
            "Retry scheduled"
        );
        counter!("boomerang_retries_scheduled_total").increment(1);
        histogram!("boomerang_retry_delay_seconds").record(self.delay.as_secs_f64());
    }
}

/// Event emitted when a message is routed to the dead-letter destination.
pub struct MessageDeadLettered {
    pub reason: &'static str,
}

impl InternalEvent for MessageDeadLettered {
    fn emit(self) {
        trace!(reason = self.reason, "Message dead-lettered");
        counter!("boomerang_dead_lettered_total", "reason" => self.reason).increment(1);
    }
}

/// Event emitted when republishing a retry fails and the message is rejected.
pub struct RetryPublishFailed;

impl InternalEvent for RetryPublishFailed {
    fn emit(self) {
        trace!("Retry republish failed");
        counter!("boomerang_republish_failures_total").increment(1);
    }
}

/// Event emitted when a failure signature crosses the poison threshold.
pub struct PoisonDetected {
    pub kind: String,
}

impl InternalEvent for PoisonDetected {
    fn emit(self) {
        trace!(kind = %self.kind, "Poison message detected");
        counter!("boomerang_poison_messages_total", "kind" => self.kind).increment(1);
    }
}

/// Event emitted to track the number of tracked failure signatures.
pub struct PoisonCacheSize {
    pub count: usize,
}

impl InternalEvent for PoisonCacheSize {
    fn emit(self) {
        trace!(count = self.count, "Poison cache size");
        gauge!("boomerang_poison_cache_entries").set(self.count as f64);
    }
}
