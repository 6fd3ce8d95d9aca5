//! Raw observation feed seam
//!
//! New raw data is announced to the pipeline by an external system. The
//! production implementation reads JSON announcement files dropped into a
//! spool directory; each announcement describes one observation group and
//! becomes one job.

use std::path::PathBuf;

use aster_core::domain::job::ProcessingMode;
use async_trait::async_trait;
use serde::Deserialize;

use super::{ExternalError, ExternalResult};

/// One announced observation group.
#[derive(Debug, Clone, Deserialize)]
pub struct RawObservation {
    /// Unique job tag for this group.
    pub tag: String,
    /// Processing task the group belongs to.
    pub task: String,
    pub instrument: String,
    pub mode: ProcessingMode,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub parameters: String,
    /// Raw file names making up the group.
    pub files: Vec<String>,
}

/// The raw feed seam.
#[async_trait]
pub trait RawFeed: Send + Sync {
    /// Observation groups announced since the last poll.
    async fn new_observations(&self) -> ExternalResult<Vec<RawObservation>>;
}

/// Spool-directory feed: reads `*.json` announcement files and renames
/// each to `*.json.done` once read, so a crash between read and rename
/// re-delivers rather than loses the group. Re-delivery is harmless
/// because job creation is idempotent on the tag.
pub struct SpoolDirFeed {
    spool_dir: PathBuf,
}

impl SpoolDirFeed {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }
}

#[async_trait]
impl RawFeed for SpoolDirFeed {
    async fn new_observations(&self) -> ExternalResult<Vec<RawObservation>> {
        let mut observations = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.spool_dir)
            .await
            .map_err(|e| ExternalError::service(format!("cannot read spool directory: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ExternalError::service(e.to_string()))?;

            let observation: RawObservation = serde_json::from_str(&content).map_err(|e| {
                ExternalError::Rejected(format!(
                    "malformed announcement {}: {}",
                    path.display(),
                    e
                ))
            })?;

            let done = path.with_extension("json.done");
            tokio::fs::rename(&path, &done)
                .await
                .map_err(|e| ExternalError::service(e.to_string()))?;

            observations.push(observation);
        }

        Ok(observations)
    }
}
