//! Task configuration types

use serde::{Deserialize, Serialize};

/// Named pipeline configuration, looked up by a job's `task` field.
///
/// Read-mostly: written by administrators, consumed by executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub taskname: String,
    /// Tri-state e-transfer setting: `None` means undecided, in which case
    /// processed jobs are left alone rather than completed or transferred.
    pub etransfer: Option<bool>,
    /// Custom run command template, overriding the standard recipe wrapper.
    pub command_run: Option<String>,
    /// Custom transfer command; when set, processed jobs are transferred by
    /// invoking it instead of the e-transfer staging flow.
    pub command_xfer: Option<String>,
    /// Custom archive ingestion command.
    pub command_ingest: Option<String>,
    /// Pinned recipe environment directory.
    pub starlink_dir: Option<String>,
    pub version: Option<i64>,
    /// Retry policy for this task's external calls; runner configuration
    /// supplies the defaults when unset.
    pub max_tries: Option<i64>,
    pub retry_delay_secs: Option<i64>,
}

impl TaskInfo {
    pub fn new(taskname: impl Into<String>) -> Self {
        Self {
            taskname: taskname.into(),
            etransfer: None,
            command_run: None,
            command_xfer: None,
            command_ingest: None,
            starlink_dir: None,
            version: None,
            max_tries: None,
            retry_delay_secs: None,
        }
    }
}
