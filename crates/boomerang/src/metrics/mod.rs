//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//!
//! Exporter wiring (Prometheus endpoint etc.) belongs to the embedding
//! process; the engine only emits through the `metrics` facade.

pub mod events;

/// Macro for emitting metric events (Vector-style pattern).
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding counter/gauge/histogram.
///
/// # Example
///
/// ```ignore
/// use boomerang::metrics::events::RetryScheduled;
///
/// emit!(RetryScheduled { attempt: 1, delay: Duration::from_secs(2) });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

// Re-export the macro at crate root
pub use emit;
