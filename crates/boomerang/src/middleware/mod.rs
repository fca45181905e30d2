//! Retry middleware wrapping handler invocation.
//!
//! One [`RetryMiddleware`] instance serves all concurrent deliveries of a
//! consumer. Per-message state travels in headers, so the only shared mutable
//! pieces are the registry's custom set and the poison detector, each behind
//! its own lock.

pub mod decision;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::classify::{HandlerError, NonRetryableRegistry};
use crate::config::DlqConfig;
use crate::emit;
use crate::metrics::events::{
    DeliveryProcessed, DeliveryStatus, HandlerFailed, MessageDeadLettered, PoisonDetected,
    RetryPublishFailed, RetryScheduled,
};
use crate::poison::PoisonDetector;
use crate::state::RetryState;
use crate::transport::{DLQ_REASON, Delivery, Transport};

use decision::{DlqReason, RetryDecision, decide};

/// Business-logic message handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// An interceptor around handler invocation.
///
/// Middlewares are composed by explicit chaining at startup; each one decides
/// whether and how to invoke `next`.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, delivery: Delivery, next: &dyn Handler) -> Result<(), HandlerError>;
}

/// The retry/dead-letter orchestrator.
///
/// Wraps handler invocation: on success the delivery is acknowledged; on
/// failure the decision chain picks between a delayed republish with
/// incremented retry state and a reject that hands the message to the
/// broker's dead-letter routing. The handler's error is returned to the
/// caller in both cases: the retry machinery augments error reporting, it
/// never swallows it.
pub struct RetryMiddleware {
    config: Arc<DlqConfig>,
    transport: Arc<dyn Transport>,
    registry: Arc<NonRetryableRegistry>,
    poison: Option<Arc<PoisonDetector>>,
    shutdown: CancellationToken,
}

impl RetryMiddleware {
    /// Wire up the middleware from a validated config.
    ///
    /// The registry is seeded with `config.non_retryable_exceptions`; the
    /// poison detector is created only when `config.track_failures` is set.
    pub fn new(
        config: Arc<DlqConfig>,
        transport: Arc<dyn Transport>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(NonRetryableRegistry::with_names(
            config.non_retryable_exceptions.iter().cloned(),
        ));
        let poison = PoisonDetector::from_config(&config).map(Arc::new);
        Self {
            config,
            transport,
            registry,
            poison,
            shutdown,
        }
    }

    /// The registry, for runtime registration of additional non-retryable
    /// kinds.
    pub fn registry(&self) -> &NonRetryableRegistry {
        &self.registry
    }

    /// Sleep for `delay`, then republish with the incremented state and
    /// acknowledge the original. Acknowledgement happens only after the
    /// republish succeeds; a failed republish rejects the original instead,
    /// since blindly retrying the republish could duplicate the message.
    ///
    /// The sleep suspends only this delivery's task and is raced against
    /// shutdown: on cancellation the delivery is left un-acked so the broker
    /// redelivers it after restart.
    async fn schedule_retry(
        &self,
        delivery: &Delivery,
        state: &RetryState,
        error: &HandlerError,
        delay: std::time::Duration,
    ) {
        let new_state = state.increment(delay, error);
        emit!(RetryScheduled {
            attempt: new_state.count,
            delay,
        });
        info!(
            attempt = new_state.count,
            max_retries = self.config.max_retries,
            delay_ms = delay.as_millis() as u64,
            kind = error.kind_name(),
            destination = %delivery.destination,
            "Scheduling retry"
        );

        tokio::select! {
            biased;

            _ = self.shutdown.cancelled() => {
                info!(
                    destination = %delivery.destination,
                    "Shutdown during retry delay, leaving delivery for redelivery"
                );
                return;
            }

            _ = tokio::time::sleep(delay) => {}
        }

        let mut headers = delivery.headers.clone();
        headers.extend(new_state.encode());

        match self
            .transport
            .publish(&delivery.destination, delivery.body.clone(), headers)
            .await
        {
            Ok(()) => {
                emit!(DeliveryProcessed {
                    status: DeliveryStatus::Retried,
                });
                if let Err(ack_error) = self.transport.ack(delivery).await {
                    warn!(error = %ack_error, "Failed to ack original after republish");
                }
            }
            Err(publish_error) => {
                emit!(RetryPublishFailed);
                error!(
                    error = %publish_error,
                    destination = %delivery.destination,
                    "Republish failed, rejecting delivery"
                );
                if let Err(nack_error) = self.transport.nack(delivery, false).await {
                    warn!(error = %nack_error, "Failed to nack after republish failure");
                }
            }
        }
    }

    /// Stamp the reason header (best-effort) and reject without requeue; the
    /// broker's dead-letter routing takes over from there.
    async fn dead_letter(&self, mut delivery: Delivery, reason: DlqReason, error: &HandlerError) {
        emit!(MessageDeadLettered {
            reason: reason.as_str(),
        });
        if let DlqReason::PoisonMessage = reason {
            emit!(PoisonDetected {
                kind: error.kind_name().to_string(),
            });
        }
        warn!(
            reason = %reason,
            kind = error.kind_name(),
            destination = %delivery.destination,
            "Routing message to dead-letter destination"
        );

        delivery
            .headers
            .insert(DLQ_REASON.to_string(), reason.as_header_value());

        emit!(DeliveryProcessed {
            status: DeliveryStatus::DeadLettered,
        });
        if let Err(nack_error) = self.transport.nack(&delivery, false).await {
            warn!(error = %nack_error, "Failed to nack dead-lettered delivery");
        }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(&self, delivery: Delivery, next: &dyn Handler) -> Result<(), HandlerError> {
        let state = RetryState::decode(Some(&delivery.headers));

        let Err(error) = next.handle(&delivery).await else {
            emit!(DeliveryProcessed {
                status: DeliveryStatus::Succeeded,
            });
            if let Err(ack_error) = self.transport.ack(&delivery).await {
                warn!(error = %ack_error, "Failed to ack successful delivery");
            }
            return Ok(());
        };

        emit!(HandlerFailed {
            kind: error.kind_name().to_string(),
        });

        // Fully bypassed: the failure goes straight back to the caller and
        // the delivery's disposition stays with the consumer.
        if !self.config.enabled {
            return Err(error);
        }

        let decision = decide(
            &self.config,
            &self.registry,
            self.poison.as_deref(),
            &delivery,
            &state,
            &error,
        )
        .await;

        match decision {
            RetryDecision::Retry { delay } => {
                self.schedule_retry(&delivery, &state, &error, delay).await;
            }
            RetryDecision::DeadLetter { reason } => {
                self.dead_letter(delivery, reason, &error).await;
            }
        }

        Err(error)
    }
}
