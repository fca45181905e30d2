//! Backoff delay calculation.
//!
//! Pure functions: policy, attempt number and config in, bounded delay out.
//! Jitter draws a fresh random factor per call so that many messages failing
//! at once do not wake up in lockstep.

use rand::Rng;
use std::time::Duration;

use crate::config::{DlqConfig, RetryPolicy};

/// Compute the delay before the next retry attempt.
///
/// `attempt` is the number of retries already made; attempt 0 computes the
/// delay before the first retry. The base delay is capped at
/// `config.max_delay_ms` before jitter, so the observable ceiling is
/// `max_delay * jitter_max`. Never panics, for any `attempt` value.
pub fn calculate_delay(config: &DlqConfig, attempt: u32) -> Duration {
    let base_ms = match config.retry_policy {
        RetryPolicy::Immediate => 0,
        RetryPolicy::Linear => config.initial_delay_ms.saturating_mul(u64::from(attempt) + 1),
        RetryPolicy::Exponential => {
            let raw = config.initial_delay_ms as f64 * config.retry_multiplier.powi(exponent(attempt));
            if raw.is_finite() && raw < u64::MAX as f64 {
                raw as u64
            } else {
                config.max_delay_ms
            }
        }
        RetryPolicy::Fibonacci => config
            .initial_delay_ms
            .saturating_mul(fibonacci(u64::from(attempt) + 1)),
    };

    let capped_ms = base_ms.min(config.max_delay_ms);

    let final_ms = if config.jitter_enabled {
        let factor = rand::rng().random_range(config.jitter_min..config.jitter_max);
        (capped_ms as f64 * factor) as u64
    } else {
        capped_ms
    };

    Duration::from_millis(final_ms)
}

fn exponent(attempt: u32) -> i32 {
    attempt.min(i32::MAX as u32) as i32
}

/// Nth Fibonacci number, `fib(1) = fib(2) = 1`, via Binet's closed form.
///
/// Exact up to the attempt counts the config ranges allow (max_retries <= 20);
/// saturates instead of overflowing for larger inputs.
fn fibonacci(n: u64) -> u64 {
    const PHI: f64 = 1.618033988749895;
    const SQRT5: f64 = 2.23606797749979;

    if n == 0 {
        return 0;
    }
    // phi^n exceeds u64 range near n = 93; beyond that the caller's
    // saturating_mul hits the delay cap anyway.
    let phi_n = PHI.powi(n.min(92) as i32);
    let rounded = (phi_n / SQRT5 + 0.5).floor();
    if rounded.is_finite() && rounded < u64::MAX as f64 {
        rounded as u64
    } else {
        u64::MAX
    }
}
