//! Error types shared across the crate.
//!
//! Every fallible public call returns [`Result`]. Storage-backend failures
//! are wrapped in [`StorageError`] with the failing operation named in the
//! message; everything else maps onto one of the caller-facing variants of
//! [`Error`].

use std::panic::Location;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures originating in the storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The underlying SQLite call failed. The message names the operation.
    #[error("database error: {0}")]
    Database(String),

    /// A schema bootstrap or forward migration failed partway.
    #[error("schema migration failed: {0}")]
    MigrationFailed(String),

    /// The verifier found a broken invariant in stored data.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Top-level error for all public operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A precondition on a public call was violated (empty required string,
    /// value out of declared range, malformed window).
    #[error("invalid argument at {location}: {message}")]
    InvalidArgument {
        /// Call site that performed the failing check.
        location: &'static Location<'static>,
        /// What was wrong, including the argument name.
        message: String,
    },

    /// A record field violates a declared invariant.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A sequence counter or per-session capacity was exhausted.
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// The referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    /// Build an [`Error::InvalidArgument`] carrying the caller's location.
    #[track_caller]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            location: Location::caller(),
            message: message.into(),
        }
    }

    /// True if this error is the invalid-argument kind.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// True if this error is the not-found kind.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
