//! Error types for the boomerang retry engine.
//!
//! Handler-side failures are represented separately by
//! [`crate::classify::HandlerError`], since those carry the classification
//! identity that drives retry decisions.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// max_retries outside the supported range.
    #[snafu(display("max_retries must be in [0, 20], got {value}"))]
    MaxRetriesOutOfRange { value: u32 },

    /// initial_delay_ms outside the supported range.
    #[snafu(display("initial_delay_ms must be in [100, 60000], got {ms}"))]
    InitialDelayOutOfRange { ms: u64 },

    /// max_delay_ms outside the supported range.
    #[snafu(display("max_delay_ms must be in [1000, 3600000], got {ms}"))]
    MaxDelayOutOfRange { ms: u64 },

    /// max_delay_ms below initial_delay_ms.
    #[snafu(display("max_delay_ms ({max_ms}) must be >= initial_delay_ms ({initial_ms})"))]
    DelayBoundsInverted { initial_ms: u64, max_ms: u64 },

    /// retry_multiplier outside the supported range.
    #[snafu(display("retry_multiplier must be in [1.0, 10.0], got {value}"))]
    MultiplierOutOfRange { value: f64 },

    /// Jitter bounds are not positive or are inverted.
    #[snafu(display("jitter range must satisfy 0 < min < max, got ({min}, {max})"))]
    JitterRangeInvalid { min: f64, max: f64 },

    /// Poison threshold must be at least one occurrence.
    #[snafu(display("poison_threshold must be >= 1"))]
    PoisonThresholdZero,

    /// Poison cache must hold at least one entry.
    #[snafu(display("poison_cache_size must be >= 1"))]
    PoisonCacheSizeZero,
}

// ============ Transport Errors ============

/// Errors surfaced by the broker-transport collaborator.
///
/// Transport implementations live outside this crate; these variants are the
/// contract they report failures through.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    /// Publishing a message failed.
    #[snafu(display("Publish to {destination} failed: {message}"))]
    Publish { destination: String, message: String },

    /// Acknowledging a delivery failed.
    #[snafu(display("Ack failed: {message}"))]
    Ack { message: String },

    /// Rejecting a delivery failed.
    #[snafu(display("Nack failed: {message}"))]
    Nack { message: String },

    /// The underlying connection or channel is gone.
    #[snafu(display("Transport connection lost: {message}"))]
    Connection { message: String },
}
