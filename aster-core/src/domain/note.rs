//! Operator note types

use serde::{Deserialize, Serialize};

/// Append-only free-text annotation for human operators.
///
/// Notes are not part of the state machine and never affect scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub job_id: i64,
    pub noted_at: chrono::DateTime<chrono::Utc>,
    pub message: String,
    pub username: String,
}
