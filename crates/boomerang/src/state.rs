//! Retry state carried across redeliveries via message headers.
//!
//! The state never lives in shared memory: it is decoded from the inbound
//! delivery's headers, incremented on failure, and encoded into the
//! republished message. Decoding is tolerant: a fresh message has no retry
//! headers at all, and a malformed header must not take the consumer down.

use chrono::Utc;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::classify::HandlerError;

pub const RETRY_COUNT: &str = "x-retry-count";
pub const RETRY_FIRST_ATTEMPT_MS: &str = "x-retry-first-attempt-ms";
pub const RETRY_TOTAL_DELAY_MS: &str = "x-retry-total-delay-ms";
pub const RETRY_LAST_ERROR: &str = "x-retry-last-error";
pub const RETRY_LAST_ERROR_TYPE: &str = "x-retry-last-error-type";
pub const RETRY_LAST_ATTEMPT_MS: &str = "x-retry-last-attempt-ms";

/// Error messages are truncated to this many characters before heading into
/// headers; brokers cap total header size.
pub const MAX_ERROR_LEN: usize = 500;

/// Immutable retry bookkeeping for one logical message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Retry attempts made so far.
    pub count: u32,
    /// Unix milliseconds of the first failure; 0 until then.
    pub first_attempt_ms: i64,
    /// Cumulative delay applied across all retries.
    pub total_delay_ms: u64,
    /// Last error message, truncated to [`MAX_ERROR_LEN`].
    pub last_error: String,
    /// Kind name of the last error.
    pub last_error_kind: String,
    /// Unix milliseconds of the most recent failure; 0 until then.
    pub last_attempt_ms: i64,
}

impl RetryState {
    /// Reconstruct state from inbound headers. Never fails: absent or
    /// unparsable fields fall back to their zero values.
    pub fn decode(headers: Option<&HashMap<String, String>>) -> Self {
        let Some(headers) = headers else {
            return Self::default();
        };
        Self {
            count: parse_or_default(headers, RETRY_COUNT),
            first_attempt_ms: parse_or_default(headers, RETRY_FIRST_ATTEMPT_MS),
            total_delay_ms: parse_or_default(headers, RETRY_TOTAL_DELAY_MS),
            last_error: headers.get(RETRY_LAST_ERROR).cloned().unwrap_or_default(),
            last_error_kind: headers
                .get(RETRY_LAST_ERROR_TYPE)
                .cloned()
                .unwrap_or_default(),
            last_attempt_ms: parse_or_default(headers, RETRY_LAST_ATTEMPT_MS),
        }
    }

    /// Stringify into the `x-retry-*` header set.
    pub fn encode(&self) -> HashMap<String, String> {
        HashMap::from([
            (RETRY_COUNT.to_string(), self.count.to_string()),
            (
                RETRY_FIRST_ATTEMPT_MS.to_string(),
                self.first_attempt_ms.to_string(),
            ),
            (
                RETRY_TOTAL_DELAY_MS.to_string(),
                self.total_delay_ms.to_string(),
            ),
            (RETRY_LAST_ERROR.to_string(), self.last_error.clone()),
            (
                RETRY_LAST_ERROR_TYPE.to_string(),
                self.last_error_kind.clone(),
            ),
            (
                RETRY_LAST_ATTEMPT_MS.to_string(),
                self.last_attempt_ms.to_string(),
            ),
        ])
    }

    /// A new state with one more attempt recorded. The original is untouched;
    /// `first_attempt_ms` is set on the first increment and preserved after.
    pub fn increment(&self, delay: Duration, error: &HandlerError) -> Self {
        let now_ms = Utc::now().timestamp_millis();
        Self {
            count: self.count.saturating_add(1),
            first_attempt_ms: if self.count == 0 {
                now_ms
            } else {
                self.first_attempt_ms
            },
            total_delay_ms: self
                .total_delay_ms
                .saturating_add(delay.as_millis() as u64),
            last_error: truncate_chars(error.message(), MAX_ERROR_LEN),
            last_error_kind: error.kind_name().to_string(),
            last_attempt_ms: now_ms,
        }
    }

    /// Wall-clock time since the first recorded failure; zero before then.
    pub fn elapsed_since_first_attempt(&self) -> Duration {
        if self.count == 0 || self.first_attempt_ms <= 0 {
            return Duration::ZERO;
        }
        let elapsed_ms = Utc::now().timestamp_millis() - self.first_attempt_ms;
        Duration::from_millis(elapsed_ms.max(0) as u64)
    }
}

fn parse_or_default<T: FromStr + Default>(headers: &HashMap<String, String>, key: &str) -> T {
    headers
        .get(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

fn truncate_chars(message: &str, max_chars: usize) -> String {
    message.chars().take(max_chars).collect()
}
