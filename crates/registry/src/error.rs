//! Registry store error types.

use thiserror::Error;

/// Registry store operation errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The registry holds data that must never exist (e.g. two entries for one code).
    /// Never repaired automatically.
    #[error("registry invariant violated: {0}")]
    InvariantViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Whether the error reports corrupted registry state rather than a backend failure.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

impl From<tally_core::Error> for RegistryError {
    fn from(err: tally_core::Error) -> Self {
        match err {
            tally_core::Error::Config(msg) => Self::Config(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
