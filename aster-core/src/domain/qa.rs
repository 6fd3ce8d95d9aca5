//! Quality-assessment types
//!
//! QA is a parallel axis to pipeline state: it gates co-add inclusion but
//! never blocks the main pipeline unless an executor explicitly checks it.
//! Judgments are append-only; the job row caches the latest status.

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Quality judgment on a job's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QaState {
    Unknown,
    Good,
    Questionable,
    Bad,
    Junk,
}

impl QaState {
    pub const ALL: [QaState; 5] = [
        QaState::Unknown,
        QaState::Good,
        QaState::Questionable,
        QaState::Bad,
        QaState::Junk,
    ];

    /// Single-character registry code.
    pub fn code(&self) -> &'static str {
        match self {
            QaState::Unknown => "?",
            QaState::Good => "G",
            QaState::Questionable => "Q",
            QaState::Bad => "B",
            QaState::Junk => "J",
        }
    }

    pub fn from_code(code: &str) -> Result<QaState, StateError> {
        match code {
            "?" => Ok(QaState::Unknown),
            "G" => Ok(QaState::Good),
            "Q" => Ok(QaState::Questionable),
            "B" => Ok(QaState::Bad),
            "J" => Ok(QaState::Junk),
            _ => Err(StateError::UnknownQaCode(code.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QaState::Unknown => "Unknown",
            QaState::Good => "Good",
            QaState::Questionable => "Questionable",
            QaState::Bad => "Bad",
            QaState::Junk => "Junk",
        }
    }

    /// Whether output with this judgment may feed a co-add.
    pub fn usable_for_coadd(&self) -> bool {
        !matches!(self, QaState::Bad | QaState::Junk)
    }
}

impl std::fmt::Display for QaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for QaState {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QaState::from_code(s)
    }
}

/// One appended QA judgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaEntry {
    pub id: i64,
    pub job_id: i64,
    pub judged_at: chrono::DateTime<chrono::Utc>,
    pub status: QaState,
    pub message: String,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for state in QaState::ALL {
            assert_eq!(QaState::from_code(state.code()).unwrap(), state);
        }
        assert!(QaState::from_code("X").is_err());
    }

    #[test]
    fn test_coadd_gating() {
        assert!(QaState::Unknown.usable_for_coadd());
        assert!(QaState::Good.usable_for_coadd());
        assert!(QaState::Questionable.usable_for_coadd());
        assert!(!QaState::Bad.usable_for_coadd());
        assert!(!QaState::Junk.usable_for_coadd());
    }
}
