//! Configuration for the retry engine.
//!
//! The settings loader that maps `DLQ_*` environment variables onto this
//! structure lives with the embedding process; this module only defines the
//! validated shape the engine consumes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::ConfigError;

/// Backoff policy mapping a retry-attempt number to a wait duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicy {
    Immediate,
    Linear,
    #[default]
    Exponential,
    Fibonacci,
}

impl RetryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryPolicy::Immediate => "immediate",
            RetryPolicy::Linear => "linear",
            RetryPolicy::Exponential => "exponential",
            RetryPolicy::Fibonacci => "fibonacci",
        }
    }
}

/// Retry/dead-letter configuration.
///
/// Constructed once at process startup, validated, then shared read-only
/// across all concurrent deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    /// Whether the retry engine is active (default: true). When false,
    /// handler failures pass straight through to the caller.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum retries before dead-lettering, in [0, 20] (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Total wall-clock budget across all retries of one message.
    #[serde(default)]
    pub max_retry_duration_ms: Option<u64>,
    /// Backoff policy (default: exponential).
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Base delay in milliseconds, in [100, 60000] (default: 1000).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Delay ceiling in milliseconds, in [1000, 3600000] (default: 60000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier for the exponential policy, in [1.0, 10.0] (default: 2.0).
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    /// Whether to randomise delays to desynchronise retry storms (default: true).
    #[serde(default = "default_jitter_enabled")]
    pub jitter_enabled: bool,
    /// Lower bound of the multiplicative jitter factor (default: 0.5).
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    /// Upper bound of the multiplicative jitter factor (default: 1.5).
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    /// Messages older than this are dead-lettered instead of retried.
    #[serde(default)]
    pub message_ttl_ms: Option<u64>,
    /// Error kinds that are never retried, in addition to the registry defaults.
    #[serde(default)]
    pub non_retryable_exceptions: HashSet<String>,
    /// When present, only these error kinds are retried (whitelist).
    #[serde(default)]
    pub retryable_exceptions: Option<HashSet<String>>,
    /// Whether to track repeated failures for poison detection (default: true).
    #[serde(default = "default_track_failures")]
    pub track_failures: bool,
    /// Identical failures of one body before it is classified poison (default: 3).
    #[serde(default = "default_poison_threshold")]
    pub poison_threshold: u32,
    /// Maximum failure signatures tracked before LRU eviction (default: 1024).
    #[serde(default = "default_poison_cache_size")]
    pub poison_cache_size: usize,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_retries: default_max_retries(),
            max_retry_duration_ms: None,
            retry_policy: RetryPolicy::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            jitter_enabled: default_jitter_enabled(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            message_ttl_ms: None,
            non_retryable_exceptions: HashSet::new(),
            retryable_exceptions: None,
            track_failures: default_track_failures(),
            poison_threshold: default_poison_threshold(),
            poison_cache_size: default_poison_cache_size(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_jitter_enabled() -> bool {
    true
}

fn default_jitter_min() -> f64 {
    0.5
}

fn default_jitter_max() -> f64 {
    1.5
}

fn default_track_failures() -> bool {
    true
}

fn default_poison_threshold() -> u32 {
    3
}

fn default_poison_cache_size() -> usize {
    1024
}

impl DlqConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: DlqConfig =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::YamlParse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges and cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > 20 {
            return Err(ConfigError::MaxRetriesOutOfRange {
                value: self.max_retries,
            });
        }
        if !(100..=60_000).contains(&self.initial_delay_ms) {
            return Err(ConfigError::InitialDelayOutOfRange {
                ms: self.initial_delay_ms,
            });
        }
        if !(1000..=3_600_000).contains(&self.max_delay_ms) {
            return Err(ConfigError::MaxDelayOutOfRange {
                ms: self.max_delay_ms,
            });
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::DelayBoundsInverted {
                initial_ms: self.initial_delay_ms,
                max_ms: self.max_delay_ms,
            });
        }
        if !(1.0..=10.0).contains(&self.retry_multiplier) {
            return Err(ConfigError::MultiplierOutOfRange {
                value: self.retry_multiplier,
            });
        }
        if !self.jitter_min.is_finite()
            || !self.jitter_max.is_finite()
            || self.jitter_min <= 0.0
            || self.jitter_max <= 0.0
            || self.jitter_min >= self.jitter_max
        {
            return Err(ConfigError::JitterRangeInvalid {
                min: self.jitter_min,
                max: self.jitter_max,
            });
        }
        if self.poison_threshold == 0 {
            return Err(ConfigError::PoisonThresholdZero);
        }
        if self.poison_cache_size == 0 {
            return Err(ConfigError::PoisonCacheSizeZero);
        }
        Ok(())
    }

    /// Config-level retryability check (whitelist/blacklist).
    ///
    /// The registry's default set is consulted separately by the middleware;
    /// this covers only the sets carried in configuration.
    pub fn should_retry(&self, kind: &str) -> bool {
        if self.non_retryable_exceptions.contains(kind) {
            return false;
        }
        if let Some(allowed) = &self.retryable_exceptions {
            return allowed.contains(kind);
        }
        true
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_retry_duration(&self) -> Option<Duration> {
        self.max_retry_duration_ms.map(Duration::from_millis)
    }

    pub fn message_ttl(&self) -> Option<Duration> {
        self.message_ttl_ms.map(Duration::from_millis)
    }
}
