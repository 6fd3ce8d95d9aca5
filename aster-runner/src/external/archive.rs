//! Archive service client
//!
//! Narrow interface to the archive's file and recipe-status services:
//! look up whether a file exists remotely (and its checksum), fetch a raw
//! file, and read the status of recipe instances running at the remote
//! site. All methods are fallible RPCs with their own retry policy applied
//! by the callers.

use std::path::{Path, PathBuf};

use aster_core::domain::state::JobState;
use async_trait::async_trait;
use serde::Deserialize;

use super::{ExternalError, ExternalResult};

/// Metadata the archive holds about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFileInfo {
    pub filename: String,
    pub checksum: Option<String>,
}

/// Status of a recipe instance at the remote site, correlated to a local
/// job through its foreign id.
#[derive(Debug, Clone)]
pub struct RemoteJobStatus {
    pub foreign_id: String,
    pub state: JobState,
    pub output_files: Vec<String>,
}

/// The archive service seam.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Look up a file in the archive; `None` when it does not exist.
    async fn file_info(&self, filename: &str) -> ExternalResult<Option<ArchiveFileInfo>>;

    /// Download a file into `dest_dir`, returning the path written.
    ///
    /// The file must appear atomically: implementations write to a
    /// temporary name and rename into place.
    async fn fetch_file(&self, filename: &str, dest_dir: &Path) -> ExternalResult<PathBuf>;

    /// Status of all recipe instances at the remote site.
    async fn recipe_status(&self) -> ExternalResult<Vec<RemoteJobStatus>>;
}

/// HTTP implementation of `ArchiveClient`.
pub struct HttpArchiveClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArchiveClient {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Deserialize)]
struct FileInfoResponse {
    filename: String,
    checksum: Option<String>,
}

#[derive(Deserialize)]
struct RecipeStatusResponse {
    foreign_id: String,
    state: String,
    #[serde(default)]
    output_files: Vec<String>,
}

#[async_trait]
impl ArchiveClient for HttpArchiveClient {
    async fn file_info(&self, filename: &str) -> ExternalResult<Option<ArchiveFileInfo>> {
        let url = format!("{}/files/{}", self.base_url, filename);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ExternalError::service(format!(
                "archive file lookup returned {}",
                response.status()
            )));
        }

        let info: FileInfoResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?;

        Ok(Some(ArchiveFileInfo {
            filename: info.filename,
            checksum: info.checksum,
        }))
    }

    async fn fetch_file(&self, filename: &str, dest_dir: &Path) -> ExternalResult<PathBuf> {
        let url = format!("{}/files/{}/data", self.base_url, filename);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ExternalError::Rejected(format!(
                "file {filename} does not exist in the archive"
            )));
        }
        if !response.status().is_success() {
            return Err(ExternalError::service(format!(
                "archive fetch returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?;

        let dest = dest_dir.join(filename);
        let partial = dest_dir.join(format!("{filename}.part"));

        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?;
        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?;

        Ok(dest)
    }

    async fn recipe_status(&self) -> ExternalResult<Vec<RemoteJobStatus>> {
        let url = format!("{}/recipes", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExternalError::service(format!(
                "recipe status query returned {}",
                response.status()
            )));
        }

        let rows: Vec<RecipeStatusResponse> = response
            .json()
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?;

        let mut statuses = Vec::with_capacity(rows.len());
        for row in rows {
            let state = JobState::from_code(&row.state).map_err(|e| {
                ExternalError::service(format!(
                    "recipe status for {}: {}",
                    row.foreign_id, e
                ))
            })?;

            statuses.push(RemoteJobStatus {
                foreign_id: row.foreign_id,
                state,
                output_files: row.output_files,
            });
        }

        Ok(statuses)
    }
}
