//! Job state machine
//!
//! States are stored in the registry as single-character codes. The set of
//! states is closed: unknown codes are rejected at the decoding boundary
//! rather than mapped to a default, so a corrupt row can never masquerade
//! as a healthy job.

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Pipeline progress state of a job.
///
/// The normal forward path is
/// `Unknown → Queued → (Missing → Fetching →) Waiting → Running → Processed
/// → Transferring → Ingestion → Ingesting → Complete`, with `Error`
/// reachable from every non-terminal state and operator reset back to
/// `Queued` as the recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Newly created, not yet validated.
    Unknown,
    /// Validated and eligible for scheduling.
    Queued,
    /// Input files are not on local disk; a fetch is required.
    Missing,
    /// A fetch process is assembling the input data.
    Fetching,
    /// Input data assembled; waiting for a run slot.
    Waiting,
    /// The reduction recipe is executing.
    Running,
    /// Recipe finished; output recorded but not yet transferred.
    Processed,
    /// Output files are in the transfer system.
    Transferring,
    /// Transfer confirmed; waiting for archive ingestion.
    Ingestion,
    /// Archive ingestion in progress.
    Ingesting,
    /// Terminal: output ingested into the archive.
    Complete,
    /// Failed; held for operator attention.
    Error,
    /// Terminal: superseded or withdrawn by a submission update.
    Deleted,
    /// Terminal: judged unprocessable.
    WontWork,
}

/// Coarse grouping of states, used for dashboard-style summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePhase {
    Queue,
    Fetch,
    Run,
    Transfer,
    Ingest,
    Complete,
    Error,
}

impl JobState {
    /// All states, in forward pipeline order.
    pub const ALL: [JobState; 14] = [
        JobState::Unknown,
        JobState::Queued,
        JobState::Missing,
        JobState::Fetching,
        JobState::Waiting,
        JobState::Running,
        JobState::Processed,
        JobState::Transferring,
        JobState::Ingestion,
        JobState::Ingesting,
        JobState::Complete,
        JobState::Error,
        JobState::Deleted,
        JobState::WontWork,
    ];

    /// Single-character registry code.
    pub fn code(&self) -> &'static str {
        match self {
            JobState::Unknown => "?",
            JobState::Queued => "Q",
            JobState::Missing => "M",
            JobState::Fetching => "F",
            JobState::Waiting => "W",
            JobState::Running => "S",
            JobState::Processed => "P",
            JobState::Transferring => "X",
            JobState::Ingestion => "I",
            JobState::Ingesting => "G",
            JobState::Complete => "Y",
            JobState::Error => "E",
            JobState::Deleted => "D",
            JobState::WontWork => "Z",
        }
    }

    /// Decode a registry code.
    pub fn from_code(code: &str) -> Result<JobState, StateError> {
        match code {
            "?" => Ok(JobState::Unknown),
            "Q" => Ok(JobState::Queued),
            "M" => Ok(JobState::Missing),
            "F" => Ok(JobState::Fetching),
            "W" => Ok(JobState::Waiting),
            "S" => Ok(JobState::Running),
            "P" => Ok(JobState::Processed),
            "X" => Ok(JobState::Transferring),
            "I" => Ok(JobState::Ingestion),
            "G" => Ok(JobState::Ingesting),
            "Y" => Ok(JobState::Complete),
            "E" => Ok(JobState::Error),
            "D" => Ok(JobState::Deleted),
            "Z" => Ok(JobState::WontWork),
            _ => Err(StateError::UnknownStateCode(code.to_string())),
        }
    }

    /// Human-readable name for display and log messages.
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Unknown => "Unknown",
            JobState::Queued => "Queued",
            JobState::Missing => "Missing",
            JobState::Fetching => "Fetching",
            JobState::Waiting => "Waiting",
            JobState::Running => "Running",
            JobState::Processed => "Processed",
            JobState::Transferring => "Transferring",
            JobState::Ingestion => "Waiting to ingest",
            JobState::Ingesting => "Ingesting",
            JobState::Complete => "Complete",
            JobState::Error => "Error",
            JobState::Deleted => "Deleted",
            JobState::WontWork => "Won't work",
        }
    }

    pub fn phase(&self) -> StatePhase {
        match self {
            JobState::Unknown | JobState::Queued => StatePhase::Queue,
            JobState::Missing | JobState::Fetching => StatePhase::Fetch,
            JobState::Waiting | JobState::Running => StatePhase::Run,
            JobState::Processed | JobState::Transferring => StatePhase::Transfer,
            JobState::Ingestion | JobState::Ingesting => StatePhase::Ingest,
            JobState::Complete | JobState::Deleted | JobState::WontWork => StatePhase::Complete,
            JobState::Error => StatePhase::Error,
        }
    }

    /// Whether a process is expected to be actively working on the job.
    ///
    /// Active jobs are skipped by operator reset unless forced: a reset
    /// under a live worker would race with its completion transition.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobState::Fetching | JobState::Running | JobState::Transferring | JobState::Ingesting
        )
    }

    /// Terminal states are never advanced by any executor.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Complete | JobState::Deleted | JobState::WontWork
        )
    }

    /// Whether `self → to` is a legal transition.
    ///
    /// Two blanket edges exist alongside the enumerated forward path: every
    /// non-terminal state may fail to `Error`, and every non-terminal state
    /// may be reset to `Queued` (the operator recovery path; resets out of
    /// active states additionally require force at the call site).
    /// Self-transitions are never legal.
    pub fn can_transition(&self, to: JobState) -> bool {
        use JobState::*;

        if *self == to {
            return false;
        }

        // Failure and reset edges from any non-terminal state.
        if to == Error && !self.is_terminal() {
            return true;
        }
        if to == Queued && !self.is_terminal() {
            return true;
        }

        matches!(
            (*self, to),
            (Unknown, WontWork)
                | (Unknown, Deleted)
                | (Queued, Waiting)
                | (Queued, Missing)
                | (Queued, Deleted)
                | (Missing, Fetching)
                | (Fetching, Waiting)
                | (Fetching, Missing)
                | (Waiting, Running)
                | (Running, Processed)
                | (Running, Missing)
                | (Processed, Transferring)
                | (Processed, Complete)
                | (Transferring, Ingestion)
                | (Transferring, Complete)
                | (Ingestion, Ingesting)
                | (Ingesting, Ingestion)
                | (Ingesting, Complete)
                | (Error, Deleted)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for JobState {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::from_code(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for state in JobState::ALL {
            assert_eq!(JobState::from_code(state.code()).unwrap(), state);
        }
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert!(matches!(
            JobState::from_code("!"),
            Err(StateError::UnknownStateCode(_))
        ));
    }

    #[test]
    fn test_state_metadata() {
        assert!(!JobState::Waiting.is_active());
        assert!(JobState::Fetching.is_active());
        assert!(JobState::Running.is_active());
        assert!(JobState::Complete.is_terminal());
        assert!(JobState::Deleted.is_terminal());
        assert!(!JobState::Error.is_terminal());
        assert_eq!(JobState::Unknown.phase(), StatePhase::Queue);
        assert_eq!(JobState::Ingestion.phase(), StatePhase::Ingest);
        assert_eq!(JobState::WontWork.name(), "Won't work");
    }

    #[test]
    fn test_forward_path_is_legal() {
        let path = [
            JobState::Unknown,
            JobState::Queued,
            JobState::Missing,
            JobState::Fetching,
            JobState::Waiting,
            JobState::Running,
            JobState::Processed,
            JobState::Transferring,
            JobState::Ingestion,
            JobState::Ingesting,
            JobState::Complete,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_error_reachable_from_non_terminal_only() {
        for state in JobState::ALL {
            assert_eq!(
                state.can_transition(JobState::Error),
                !state.is_terminal() && state != JobState::Error
            );
        }
    }

    #[test]
    fn test_reset_edge() {
        assert!(JobState::Error.can_transition(JobState::Queued));
        assert!(JobState::Running.can_transition(JobState::Queued));
        assert!(!JobState::Complete.can_transition(JobState::Queued));
        assert!(!JobState::Deleted.can_transition(JobState::Queued));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert!(!JobState::Queued.can_transition(JobState::Running));
        assert!(!JobState::Waiting.can_transition(JobState::Processed));
        assert!(!JobState::Complete.can_transition(JobState::Ingesting));
        assert!(!JobState::Running.can_transition(JobState::Running));
        assert!(!JobState::Processed.can_transition(JobState::Ingestion));
    }
}
