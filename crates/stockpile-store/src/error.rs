//! Error types for the stockpile-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Validation of coordinates and entries has its own [`ModelError`] so the
//! gateways can report it to callers without touching persistence errors.

use std::path::PathBuf;

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot file exists but cannot be trusted.
    #[error("snapshot {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

/// Validation failures for [`Coordinate`](crate::Coordinate) and
/// [`Entry`](crate::Entry) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A coordinate did not have exactly three components.
    #[error("expected 3 coordinate components (x y z), got {0}")]
    CoordinateArity(usize),

    /// A coordinate component was not a valid integer.
    #[error("`{value}` is not a valid integer for {axis}")]
    CoordinateComponent { axis: char, value: String },

    /// The entry label was empty after trimming.
    #[error("item label must not be empty")]
    EmptyLabel,

    /// The entry label exceeded the maximum length.
    #[error("item label is {len} characters long (max {max})")]
    LabelTooLong { len: usize, max: usize },

    /// Too many metadata keys on one entry.
    #[error("entry has {count} metadata keys (max {max})")]
    TooManyMetadata { count: usize, max: usize },

    /// A metadata key or value is empty or too long.
    #[error("invalid metadata `{key}`: {reason}")]
    InvalidMetadata { key: String, reason: String },
}
