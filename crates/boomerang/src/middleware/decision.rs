//! The retry/dead-letter decision chain.
//!
//! Evaluated on every handler failure, in a fixed order: permanent errors
//! first (they are free to detect), then retry-budget limits, then poison
//! detection, then TTL expiry. Only a message that clears every gate is
//! scheduled for another attempt.

use std::fmt;
use std::time::Duration;

use crate::classify::{HandlerError, NonRetryableRegistry};
use crate::config::DlqConfig;
use crate::delay::calculate_delay;
use crate::expiry::is_expired;
use crate::poison::PoisonDetector;
use crate::state::RetryState;
use crate::transport::Delivery;

/// Why a message was routed to the dead-letter destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DlqReason {
    /// The error kind is classified permanent.
    NonRetryable { kind: String },
    /// The retry count budget is spent.
    MaxRetriesExceeded,
    /// The wall-clock retry budget is spent.
    MaxDurationExceeded,
    /// The same body keeps failing the same way.
    PoisonMessage,
    /// The message outlived its TTL.
    MessageExpired,
}

impl DlqReason {
    /// Stable label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqReason::NonRetryable { .. } => "non_retryable",
            DlqReason::MaxRetriesExceeded => "max_retries_exceeded",
            DlqReason::MaxDurationExceeded => "max_duration_exceeded",
            DlqReason::PoisonMessage => "poison_message",
            DlqReason::MessageExpired => "message_expired",
        }
    }

    /// Value stamped into the `x-dlq-reason` header. Non-retryable reasons
    /// carry the offending kind name (`non_retryable:ValidationError`).
    pub fn as_header_value(&self) -> String {
        match self {
            DlqReason::NonRetryable { kind } => format!("non_retryable:{kind}"),
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for DlqReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_header_value())
    }
}

/// Outcome of the decision chain for one failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then republish with incremented state.
    Retry { delay: Duration },
    /// Reject without requeue; the broker's dead-letter routing takes over.
    DeadLetter { reason: DlqReason },
}

/// Run the decision chain. The caller has already checked `config.enabled`.
pub(crate) async fn decide(
    config: &DlqConfig,
    registry: &NonRetryableRegistry,
    poison: Option<&PoisonDetector>,
    delivery: &Delivery,
    state: &RetryState,
    error: &HandlerError,
) -> RetryDecision {
    if registry.is_non_retryable(error) || !config.should_retry(error.kind_name()) {
        return RetryDecision::DeadLetter {
            reason: DlqReason::NonRetryable {
                kind: error.kind_name().to_string(),
            },
        };
    }

    if state.count >= config.max_retries {
        return RetryDecision::DeadLetter {
            reason: DlqReason::MaxRetriesExceeded,
        };
    }

    // The duration budget only applies once a first attempt exists to
    // measure from.
    if let Some(budget) = config.max_retry_duration()
        && state.count > 0
        && state.elapsed_since_first_attempt() >= budget
    {
        return RetryDecision::DeadLetter {
            reason: DlqReason::MaxDurationExceeded,
        };
    }

    if let Some(detector) = poison
        && detector.check_and_record(&delivery.body, error).await
    {
        return RetryDecision::DeadLetter {
            reason: DlqReason::PoisonMessage,
        };
    }

    if is_expired(&delivery.headers, config.message_ttl()) {
        return RetryDecision::DeadLetter {
            reason: DlqReason::MessageExpired,
        };
    }

    RetryDecision::Retry {
        delay: calculate_delay(config, state.count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PUBLISHED_AT_MS;
    use chrono::Utc;

    fn config() -> DlqConfig {
        DlqConfig {
            jitter_enabled: false,
            retry_policy: crate::config::RetryPolicy::Linear,
            ..DlqConfig::default()
        }
    }

    fn delivery() -> Delivery {
        Delivery::new("orders.created", &b"{\"id\":1}"[..])
    }

    #[tokio::test]
    async fn test_retry_with_linear_delay() {
        let config = config();
        let registry = NonRetryableRegistry::new();
        let state = RetryState {
            count: 1,
            ..RetryState::default()
        };

        let decision = decide(
            &config,
            &registry,
            None,
            &delivery(),
            &state,
            &HandlerError::timeout("t"),
        )
        .await;
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_millis(2000)
            }
        );
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits_poison_detection() {
        let config = config();
        let registry = NonRetryableRegistry::new();
        let detector = PoisonDetector::new(3, 16);

        let decision = decide(
            &config,
            &registry,
            Some(&detector),
            &delivery(),
            &RetryState::default(),
            &HandlerError::validation("bad input"),
        )
        .await;

        assert_eq!(
            decision,
            RetryDecision::DeadLetter {
                reason: DlqReason::NonRetryable {
                    kind: "ValidationError".to_string()
                }
            }
        );
        // Short-circuited before the detector was consulted
        assert!(detector.is_empty().await);
    }

    #[tokio::test]
    async fn test_max_retries_exceeded() {
        let config = config();
        let registry = NonRetryableRegistry::new();
        let state = RetryState {
            count: 3,
            ..RetryState::default()
        };

        let decision = decide(
            &config,
            &registry,
            None,
            &delivery(),
            &state,
            &HandlerError::timeout("t"),
        )
        .await;
        assert_eq!(
            decision,
            RetryDecision::DeadLetter {
                reason: DlqReason::MaxRetriesExceeded
            }
        );
    }

    #[tokio::test]
    async fn test_max_duration_ignored_before_first_attempt() {
        let config = DlqConfig {
            max_retry_duration_ms: Some(1),
            ..config()
        };
        let registry = NonRetryableRegistry::new();

        let decision = decide(
            &config,
            &registry,
            None,
            &delivery(),
            &RetryState::default(),
            &HandlerError::timeout("t"),
        )
        .await;
        assert!(matches!(decision, RetryDecision::Retry { .. }));
    }

    #[tokio::test]
    async fn test_max_duration_exceeded() {
        let config = DlqConfig {
            max_retry_duration_ms: Some(5000),
            ..config()
        };
        let registry = NonRetryableRegistry::new();
        let state = RetryState {
            count: 1,
            first_attempt_ms: Utc::now().timestamp_millis() - 10_000,
            ..RetryState::default()
        };

        let decision = decide(
            &config,
            &registry,
            None,
            &delivery(),
            &state,
            &HandlerError::timeout("t"),
        )
        .await;
        assert_eq!(
            decision,
            RetryDecision::DeadLetter {
                reason: DlqReason::MaxDurationExceeded
            }
        );
    }

    #[tokio::test]
    async fn test_expired_message_is_dead_lettered() {
        let config = DlqConfig {
            message_ttl_ms: Some(1000),
            ..config()
        };
        let registry = NonRetryableRegistry::new();
        let mut delivery = delivery();
        delivery.headers.insert(
            PUBLISHED_AT_MS.to_string(),
            (Utc::now().timestamp_millis() - 60_000).to_string(),
        );

        let decision = decide(
            &config,
            &registry,
            None,
            &delivery,
            &RetryState::default(),
            &HandlerError::timeout("t"),
        )
        .await;
        assert_eq!(
            decision,
            RetryDecision::DeadLetter {
                reason: DlqReason::MessageExpired
            }
        );
    }

    #[test]
    fn test_reason_header_values() {
        assert_eq!(
            DlqReason::NonRetryable {
                kind: "ValidationError".to_string()
            }
            .as_header_value(),
            "non_retryable:ValidationError"
        );
        assert_eq!(
            DlqReason::MaxRetriesExceeded.as_header_value(),
            "max_retries_exceeded"
        );
        assert_eq!(DlqReason::PoisonMessage.as_str(), "poison_message");
    }
}
