//! Engine error types.
//!
//! Duplicate and unknown scans are outcomes, not errors; see
//! [`crate::ScanOutcome`]. Only caller mistakes and store trouble end up here.

use std::time::Duration;
use tally_registry::RegistryError;
use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input is not a valid code (empty or too long).
    #[error("invalid code: {0}")]
    InvalidCode(String),

    /// The requested code is not registered.
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry store failed. Safe to retry.
    #[error("registry store unavailable: {0}")]
    StoreUnavailable(#[source] RegistryError),

    /// A store call did not finish in time. Safe to retry.
    #[error("registry store call `{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The registry holds data that must never exist. Not retryable.
    #[error("registry invariant violated: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the failure is transient backend trouble (including timeouts).
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Timeout { .. })
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCode(_) => "invalid_code",
            Self::NotFound(_) => "not_found",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Timeout { .. } => "store_timeout",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Config(_) => "config",
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvariantViolation(msg) => Self::InvariantViolation(msg),
            RegistryError::NotFound(msg) => Self::NotFound(msg),
            other => Self::StoreUnavailable(other),
        }
    }
}

impl From<tally_core::Error> for EngineError {
    fn from(err: tally_core::Error) -> Self {
        match err {
            tally_core::Error::InvalidCode(msg) => Self::InvalidCode(msg),
            tally_core::Error::InvalidScanResult(msg) => Self::InvariantViolation(msg),
            tally_core::Error::Config(msg) => Self::Config(msg),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Run a store call bounded by `limit`.
///
/// A call that outlives the limit is dropped, which rolls back any
/// transaction it had open.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> EngineResult<T>
where
    F: std::future::Future<Output = Result<T, RegistryError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(_) => {
            tracing::warn!(operation, timeout = ?limit, "registry store call timed out");
            Err(EngineError::Timeout {
                operation,
                after: limit,
            })
        }
    }
}
