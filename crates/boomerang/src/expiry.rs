//! Message TTL expiry check.

use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;

use crate::transport::PUBLISHED_AT_MS;

/// Whether a message has outlived `ttl`, judged by the transport-stamped
/// publish timestamp header.
///
/// Pure function. A missing or unparsable timestamp never counts against the
/// message, and `ttl = None` disables expiry entirely.
pub fn is_expired(headers: &HashMap<String, String>, ttl: Option<Duration>) -> bool {
    let Some(ttl) = ttl else {
        return false;
    };
    let Some(published_ms) = headers
        .get(PUBLISHED_AT_MS)
        .and_then(|value| value.parse::<i64>().ok())
    else {
        return false;
    };
    let age_ms = Utc::now().timestamp_millis() - published_ms;
    age_ms >= 0 && age_ms as u128 >= ttl.as_millis()
}
