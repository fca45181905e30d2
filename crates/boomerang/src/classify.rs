//! Handler failure classification.
//!
//! Failures carry a stable kind name (e.g. `ValidationError`) that travels
//! through message headers and drives the retry/dead-letter decision. Known
//! categories are a closed enum; anything else rides along as a custom name,
//! so embedders can classify their own error types without touching this
//! crate.

use std::collections::HashSet;
use std::fmt;
use std::sync::{LazyLock, PoisonError, RwLock};

/// Deterministic data/logic errors that retrying cannot fix.
static DEFAULT_NON_RETRYABLE: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "ValidationError",
        "MalformedPayloadError",
        "TypeMismatchError",
        "MissingFieldError",
        "SchemaViolationError",
    ])
});

/// Category of a handler failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    MalformedPayload,
    TypeMismatch,
    MissingField,
    SchemaViolation,
    Timeout,
    Connection,
    Unavailable,
    Internal,
    /// An embedder-defined kind, identified by its name.
    Custom(String),
}

impl ErrorKind {
    /// The stable name used for registry lookups and header propagation.
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::MalformedPayload => "MalformedPayloadError",
            ErrorKind::TypeMismatch => "TypeMismatchError",
            ErrorKind::MissingField => "MissingFieldError",
            ErrorKind::SchemaViolation => "SchemaViolationError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Unavailable => "UnavailableError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A handler failure with its classification identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A failure with an embedder-defined kind name.
    pub fn custom(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Custom(kind.into()), message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedPayload, message)
    }

    pub fn missing_field(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingField, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn kind_name(&self) -> &str {
        self.kind.name()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Thread-safe set of error kinds that must never be retried.
///
/// Lookups against the default set are lock-free (frozen static); the custom
/// set is guarded by a read-write lock. Defaults cannot be unregistered.
#[derive(Debug, Default)]
pub struct NonRetryableRegistry {
    custom: RwLock<HashSet<String>>,
}

impl NonRetryableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-seeded with additional kind names (typically from
    /// `DlqConfig::non_retryable_exceptions`).
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            custom: RwLock::new(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_non_retryable(&self, error: &HandlerError) -> bool {
        let name = error.kind_name();
        if DEFAULT_NON_RETRYABLE.contains(name) {
            return true;
        }
        self.custom
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Mark additional kind names as non-retryable at runtime.
    pub fn register<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut custom = self.custom.write().unwrap_or_else(PoisonError::into_inner);
        custom.extend(names.into_iter().map(Into::into));
    }

    /// Remove previously registered kind names. Defaults are unaffected.
    pub fn unregister<'a, I>(&self, names: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut custom = self.custom.write().unwrap_or_else(PoisonError::into_inner);
        for name in names {
            custom.remove(name);
        }
    }

    /// Snapshot of the runtime-registered names, for diagnostics.
    pub fn custom_names(&self) -> Vec<String> {
        self.custom
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_non_retryable_by_default() {
        let registry = NonRetryableRegistry::new();
        assert!(registry.is_non_retryable(&HandlerError::validation("bad input")));
        assert!(registry.is_non_retryable(&HandlerError::missing_field("no tenant_id")));
        assert!(!registry.is_non_retryable(&HandlerError::timeout("upstream timed out")));
    }

    #[test]
    fn test_register_and_unregister_custom_kind() {
        let registry = NonRetryableRegistry::new();
        let error = HandlerError::custom("QuotaExceededError", "plan limit reached");

        assert!(!registry.is_non_retryable(&error));

        registry.register(["QuotaExceededError"]);
        assert!(registry.is_non_retryable(&error));

        registry.unregister(["QuotaExceededError"]);
        assert!(!registry.is_non_retryable(&error));
    }

    #[test]
    fn test_defaults_cannot_be_unregistered() {
        let registry = NonRetryableRegistry::new();
        registry.unregister(["ValidationError"]);
        assert!(registry.is_non_retryable(&HandlerError::validation("still permanent")));
    }

    #[test]
    fn test_seeded_registry() {
        let registry = NonRetryableRegistry::with_names(["TenantSuspendedError"]);
        assert!(
            registry.is_non_retryable(&HandlerError::custom("TenantSuspendedError", "suspended"))
        );
        assert_eq!(registry.custom_names(), vec!["TenantSuspendedError"]);
    }

    #[test]
    fn test_error_display_includes_kind() {
        let error = HandlerError::timeout("no response after 30s");
        assert_eq!(error.to_string(), "TimeoutError: no response after 30s");
        assert_eq!(error.kind_name(), "TimeoutError");
    }
}
