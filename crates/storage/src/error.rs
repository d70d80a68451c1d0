//! Store error types and result alias.
//!
//! Every operation in this crate returns [`StoreResult<T>`]. The variants of
//! [`StoreError`] follow the store's propagation policy:
//!
//! - [`StoreError::ConcurrencyConflict`] - a versioned write lost a race. The patch engine
//!   retries these internally; callers only see them from a direct versioned `put`.
//! - [`StoreError::PatchRetriesExhausted`] - the patch engine gave up after its retry budget.
//! - [`StoreError::TypeMismatch`] - a collection operator hit a field of the wrong shape.
//! - [`StoreError::NotANumber`] - an increment hit a non-numeric field.
//! - [`StoreError::Updater`] - a caller-supplied updater failed; never retried.
//! - [`StoreError::NotLocal`] - a local-only operation was attempted on a remote store.
//! - [`StoreError::Serialization`] / [`StoreError::Internal`] - everything else.
//!
//! # Example
//!
//! ```
//! use kvstash_storage::{StoreError, StoreResult};
//!
//! fn bump(key: &str) -> StoreResult<u64> {
//!     Err(StoreError::retries_exhausted(key, 6))
//! }
//!
//! assert!(matches!(bump("jobs"), Err(StoreError::PatchRetriesExhausted { attempts: 6, .. })));
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The expected version supplied to a write no longer matches the stored record.
    ///
    /// Recoverable by re-reading and retrying the whole read-modify-write sequence.
    #[error("Concurrency conflict on key {key}")]
    ConcurrencyConflict {
        /// The key whose version changed.
        key: String,
    },

    /// The patch engine consumed its retry budget without a clean write.
    #[error("Failed to update key {key}: CAS retries exhausted after {attempts} attempts")]
    PatchRetriesExhausted {
        /// The key being patched.
        key: String,
        /// Total number of attempts made (initial attempt plus retries).
        attempts: u32,
    },

    /// A collection operator targeted a field holding an incompatible shape.
    #[error("Cannot operate on non-array value at {key}.{field}: value is type {found}")]
    TypeMismatch {
        /// The key of the record.
        key: String,
        /// The offending field.
        field: String,
        /// JSON type name of the value found in the field.
        found: &'static str,
    },

    /// A numeric increment targeted a field that is neither a number nor a numeric string.
    #[error("Cannot increment non-numeric value at {key}.{field}: value is type {found}")]
    NotANumber {
        /// The key of the record.
        key: String,
        /// The offending field.
        field: String,
        /// JSON type name of the value found in the field.
        found: &'static str,
    },

    /// A caller-supplied patch updater returned an error.
    #[error("Updater failed: {message}")]
    Updater {
        /// Description of the failure.
        message: String,
        /// The underlying error raised by the updater.
        #[source]
        source: Option<BoxError>,
    },

    /// A local-only operation (such as reset) was attempted on a non-local store.
    #[error("Attempting to reset non-local store: {store}")]
    NotLocal {
        /// Name of the store in the registry.
        store: String,
    },

    /// A typed value could not be converted to or from its stored JSON form.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Backend-specific internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },
}

impl StoreError {
    /// Creates a new `ConcurrencyConflict` error for the given key.
    #[must_use]
    pub fn conflict(key: impl Into<String>) -> Self {
        Self::ConcurrencyConflict { key: key.into() }
    }

    /// Creates a new `PatchRetriesExhausted` error.
    #[must_use]
    pub fn retries_exhausted(key: impl Into<String>, attempts: u32) -> Self {
        Self::PatchRetriesExhausted { key: key.into(), attempts }
    }

    /// Creates a new `TypeMismatch` error.
    #[must_use]
    pub fn type_mismatch(
        key: impl Into<String>,
        field: impl Into<String>,
        found: &'static str,
    ) -> Self {
        Self::TypeMismatch { key: key.into(), field: field.into(), found }
    }

    /// Creates a new `NotANumber` error.
    #[must_use]
    pub fn not_a_number(key: impl Into<String>, field: impl Into<String>, found: &'static str) -> Self {
        Self::NotANumber { key: key.into(), field: field.into(), found }
    }

    /// Creates a new `Updater` error with the given message.
    #[must_use]
    pub fn updater(message: impl Into<String>) -> Self {
        Self::Updater { message: message.into(), source: None }
    }

    /// Creates a new `Updater` error wrapping the error an updater produced.
    #[must_use]
    pub fn updater_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Updater { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `NotLocal` error.
    #[must_use]
    pub fn not_local(store: impl Into<String>) -> Self {
        Self::NotLocal { store: store.into() }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Returns `true` if this error is a version conflict that a fresh
    /// read-modify-write attempt could resolve.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source(err.to_string(), err)
    }
}

/// Error returned when a [`StoreConfig`](crate::StoreConfig) fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is above its allowed maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// Name of the offending field.
        field: &'static str,
        /// The configured value.
        value: u64,
        /// The allowed maximum.
        max: u64,
    },
}
