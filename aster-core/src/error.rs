//! Error types for the core domain

use thiserror::Error;

use crate::domain::state::JobState;

/// Errors from the state machine and code decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The requested transition is not in the transition table.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    /// A state code read from storage is not in the closed enumeration.
    #[error("unknown state code: {0:?}")]
    UnknownStateCode(String),

    /// A QA code read from storage is not in the closed enumeration.
    #[error("unknown QA state code: {0:?}")]
    UnknownQaCode(String),

    /// A processing mode string is not recognised.
    #[error("unknown processing mode: {0:?}")]
    UnknownMode(String),
}
