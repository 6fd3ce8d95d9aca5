//! Registry error taxonomy

use thiserror::Error;

use aster_core::domain::state::JobState;
use aster_core::error::StateError;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors surfaced by registry operations.
///
/// `StateConflict` and transient failures are retried by the next poll
/// pass; `Validation` and `DuplicateTag` are fatal to the single operation
/// and surfaced to the caller.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No job matched the requested id or tag.
    #[error("job not found: {0}")]
    NotFound(String),

    /// A job with this tag already exists.
    #[error("duplicate job tag: {0:?}")]
    DuplicateTag(String),

    /// Optimistic-lock violation: the job's state changed under the caller.
    #[error(
        "state conflict on job {job_id}: expected {expected} but found {actual}"
    )]
    StateConflict {
        job_id: i64,
        expected: JobState,
        actual: JobState,
    },

    /// The requested transition is not in the state machine's table.
    #[error(transparent)]
    State(#[from] StateError),

    /// Malformed parameters, bad file name pattern, or a refused operation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RegistryError {
    /// Whether the next poll pass may safely retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::StateConflict { .. } | RegistryError::Database(_)
        )
    }
}
