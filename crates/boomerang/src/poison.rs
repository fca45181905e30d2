//! Poison message detection.
//!
//! A message whose body keeps failing with the same error kind is burning
//! retry budget for nothing. The detector counts (body hash, error kind)
//! occurrences in a bounded LRU cache and flags the combination once it
//! reaches the configured threshold. State is per-process and in-memory;
//! after a restart, redeliveries re-earn their poison classification.

use chrono::{DateTime, Utc};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::classify::HandlerError;
use crate::config::DlqConfig;
use crate::emit;
use crate::metrics::events::PoisonCacheSize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoisonKey {
    content_hash: [u8; 32],
    error_kind: String,
}

#[derive(Debug, Clone)]
struct PoisonEntry {
    occurrences: u32,
    last_seen: DateTime<Utc>,
}

/// Bounded, thread-safe failure-signature counter.
pub struct PoisonDetector {
    entries: Mutex<LruCache<PoisonKey, PoisonEntry>>,
    threshold: u32,
}

impl PoisonDetector {
    /// Create a detector flagging signatures after `threshold` occurrences,
    /// tracking at most `capacity` distinct signatures (LRU eviction beyond).
    pub fn new(threshold: u32, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            threshold: threshold.max(1),
        }
    }

    /// Build a detector from config, or `None` when failure tracking is off.
    pub fn from_config(config: &DlqConfig) -> Option<Self> {
        config
            .track_failures
            .then(|| Self::new(config.poison_threshold, config.poison_cache_size))
    }

    /// Record one failure of `body` with `error` and report whether the
    /// combination has now crossed the poison threshold.
    ///
    /// The count lookup and increment happen under one lock acquisition, so
    /// concurrent deliveries of the same body cannot lose updates.
    pub async fn check_and_record(&self, body: &[u8], error: &HandlerError) -> bool {
        let key = PoisonKey {
            content_hash: Sha256::digest(body).into(),
            error_kind: error.kind_name().to_string(),
        };

        let mut entries = self.entries.lock().await;
        let occurrences = {
            let entry = entries.get_or_insert_mut(key, || PoisonEntry {
                occurrences: 0,
                last_seen: Utc::now(),
            });
            entry.occurrences += 1;
            entry.last_seen = Utc::now();
            entry.occurrences
        };
        emit!(PoisonCacheSize {
            count: entries.len(),
        });

        let poisoned = occurrences >= self.threshold;
        if poisoned {
            debug!(
                occurrences,
                kind = error.kind_name(),
                "Failure signature crossed poison threshold"
            );
        }
        poisoned
    }

    /// When the given signature was last recorded, if still tracked.
    ///
    /// Reads without promoting the entry, so diagnostics do not disturb
    /// eviction order.
    pub async fn last_seen(&self, body: &[u8], error: &HandlerError) -> Option<DateTime<Utc>> {
        let key = PoisonKey {
            content_hash: Sha256::digest(body).into(),
            error_kind: error.kind_name().to_string(),
        };
        self.entries
            .lock()
            .await
            .peek(&key)
            .map(|entry| entry.last_seen)
    }

    /// Number of failure signatures currently tracked.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_threshold_sequence() {
        let detector = PoisonDetector::new(3, 16);
        let error = HandlerError::timeout("stuck");

        assert!(!detector.check_and_record(b"payload", &error).await);
        assert!(!detector.check_and_record(b"payload", &error).await);
        assert!(detector.check_and_record(b"payload", &error).await);
        // Stays poisoned on further occurrences
        assert!(detector.check_and_record(b"payload", &error).await);
    }

    #[tokio::test]
    async fn test_different_error_kind_is_a_different_key() {
        let detector = PoisonDetector::new(2, 16);

        assert!(
            !detector
                .check_and_record(b"payload", &HandlerError::timeout("t"))
                .await
        );
        // Same body, different kind: count starts over
        assert!(
            !detector
                .check_and_record(b"payload", &HandlerError::connection("c"))
                .await
        );
        assert!(
            detector
                .check_and_record(b"payload", &HandlerError::timeout("t"))
                .await
        );
    }

    #[tokio::test]
    async fn test_different_body_is_a_different_key() {
        let detector = PoisonDetector::new(2, 16);
        let error = HandlerError::timeout("t");

        assert!(!detector.check_and_record(b"one", &error).await);
        assert!(!detector.check_and_record(b"two", &error).await);
        assert_eq!(detector.len().await, 2);
    }

    #[tokio::test]
    async fn test_lru_eviction_resets_counts() {
        let detector = PoisonDetector::new(2, 2);
        let error = HandlerError::timeout("t");

        detector.check_and_record(b"a", &error).await;
        detector.check_and_record(b"b", &error).await;
        // Inserting a third signature evicts "a"
        detector.check_and_record(b"c", &error).await;
        assert_eq!(detector.len().await, 2);

        // "a" was evicted, so its count starts from scratch
        assert!(!detector.check_and_record(b"a", &error).await);
    }

    #[tokio::test]
    async fn test_last_seen_tracks_recorded_signatures() {
        let detector = PoisonDetector::new(3, 16);
        let error = HandlerError::timeout("t");

        assert!(detector.last_seen(b"payload", &error).await.is_none());

        let before = Utc::now();
        detector.check_and_record(b"payload", &error).await;
        let seen = detector.last_seen(b"payload", &error).await.unwrap();
        assert!(seen >= before);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        use std::sync::Arc;

        let detector = Arc::new(PoisonDetector::new(50, 16));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let detector = Arc::clone(&detector);
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    detector
                        .check_and_record(b"shared", &HandlerError::timeout("t"))
                        .await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // 50 recorded failures against threshold 50: the next one must flag
        assert!(
            detector
                .check_and_record(b"shared", &HandlerError::timeout("t"))
                .await
        );
    }
}
