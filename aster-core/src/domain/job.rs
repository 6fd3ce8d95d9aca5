//! Job domain types

use serde::{Deserialize, Serialize};

use crate::domain::qa::QaState;
use crate::domain::state::JobState;
use crate::error::StateError;

/// One unit of processing work, tracked through the state machine.
///
/// Structure shared between the registry (persists) and the runner
/// (advances). `state_prev` is maintained by the registry: it always holds
/// the state the job was in before the most recent transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// Unique human-readable identifier, immutable after creation.
    pub tag: String,
    pub state: JobState,
    pub state_prev: JobState,
    /// Execution site responsible for this job (e.g. the local site name or
    /// a remote archive site). Determines which executors may claim it.
    pub location: String,
    /// Identifier of the counterpart job in a remote system, set when
    /// `location` indicates remote processing. `(location, foreign_id)` is
    /// unique in the registry.
    pub foreign_id: Option<String>,
    pub mode: ProcessingMode,
    /// Opaque recipe parameter string passed to the execution step.
    pub parameters: String,
    /// Higher values are claimed first.
    pub priority: i64,
    /// Name of the processing pipeline this job belongs to.
    pub task: String,
    /// Cached summary of the latest QA judgment; orthogonal to `state`.
    pub qa_state: QaState,
    /// Instrument that produced the raw data, recorded at ingest.
    pub instrument: Option<String>,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

/// Processing mode classifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Single-observation reduction.
    Obs,
    /// Whole-night reduction.
    Night,
    /// Per-project reduction.
    Project,
    /// Public co-added products.
    Public,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Obs => "obs",
            ProcessingMode::Night => "night",
            ProcessingMode::Project => "project",
            ProcessingMode::Public => "public",
        }
    }

    pub fn from_str_mode(s: &str) -> Result<ProcessingMode, StateError> {
        match s {
            "obs" => Ok(ProcessingMode::Obs),
            "night" => Ok(ProcessingMode::Night),
            "project" => Ok(ProcessingMode::Project),
            "public" => Ok(ProcessingMode::Public),
            _ => Err(StateError::UnknownMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingMode {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessingMode::from_str_mode(s)
    }
}

/// An input file recorded for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFile {
    pub job_id: i64,
    pub filename: String,
}

/// An output file recorded for a job, with its checksum once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFile {
    pub job_id: i64,
    pub filename: String,
    pub checksum: Option<String>,
}

/// Parent dependency edge: `job_id` consumes the outputs of `parent_id`,
/// restricted to filenames matching `filter` when one is set.
///
/// Edges form a DAG keyed by id pairs; children never own their parents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub job_id: i64,
    pub parent_id: i64,
    pub filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip() {
        for mode in [
            ProcessingMode::Obs,
            ProcessingMode::Night,
            ProcessingMode::Project,
            ProcessingMode::Public,
        ] {
            assert_eq!(ProcessingMode::from_str_mode(mode.as_str()).unwrap(), mode);
        }
        assert!(ProcessingMode::from_str_mode("interactive").is_err());
    }
}
