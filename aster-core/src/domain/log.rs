//! Audit log types

use serde::{Deserialize, Serialize};

use crate::domain::state::JobState;

/// One row of a job's append-only audit trail.
///
/// The registry writes exactly one of these per state change, in the same
/// transaction as the change itself. Rows are never edited or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub job_id: i64,
    pub logged_at: chrono::DateTime<chrono::Utc>,
    pub state_prev: JobState,
    pub state_new: JobState,
    pub message: String,
    pub host: String,
    pub username: String,
}

/// Identity of the process performing a registry mutation, recorded on
/// every audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub host: String,
    pub username: String,
}

impl Actor {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
        }
    }
}
