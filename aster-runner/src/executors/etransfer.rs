//! E-transfer executor
//!
//! Stages output files into the transfer-system pickup directories and
//! later confirms their arrival at the archive. Staging copies each file
//! into the e-transfer scratch directory and renames it into place: the
//! rename is atomic within one filesystem, so the transfer system never
//! observes a partial file.

use std::path::Path;

use anyhow::Context;
use aster_core::domain::job::{Job, OutputFile};
use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::service::job_service;
use sqlx::SqlitePool;

use super::{Outcome, advance, fail, retry_policy};
use crate::config::Config;
use crate::directories;
use crate::external::archive::ArchiveClient;
use crate::external::{bounded, with_retries};

/// Where a staged file currently is, as seen by the pickup-directory scan.
enum TransferStatus {
    InProgress,
    Rejected(String),
    Gone,
}

/// Stage the output of a Processed job into the e-transfer directories.
///
/// The job's state is checked up front but only transitioned after the
/// staging succeeds; the conditioned transition at the end catches a
/// concurrent claimer, making a lost race a skip rather than corruption.
pub async fn send_output(
    pool: &SqlitePool,
    config: &Config,
    archive: &dyn ArchiveClient,
    job: &Job,
    force: bool,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    if !force && job.state != JobState::Processed {
        return Err(RegistryError::Validation(format!(
            "job {} cannot be e-transferred from state {}",
            job.id, job.state
        )));
    }

    let outputs = job_service::get_output_files(pool, job.id).await?;
    if outputs.is_empty() {
        return fail(
            pool,
            job.id,
            JobState::Processed,
            "No output files recorded; nothing to e-transfer",
            actor,
        )
        .await;
    }

    match stage_files(pool, config, archive, job, &outputs).await {
        Ok(staged) => {
            if force {
                job_service::change_state(
                    pool,
                    job.id,
                    JobState::Transferring,
                    &format!("Output files copied into the e-transfer directories ({staged} staged, forced)"),
                    None,
                    actor,
                )
                .await?;
                Ok(Outcome::Advanced(JobState::Transferring))
            } else {
                advance(
                    pool,
                    job.id,
                    JobState::Processed,
                    JobState::Transferring,
                    &format!("Output files copied into the e-transfer directories ({staged} staged)"),
                    actor,
                )
                .await
            }
        }
        Err(e) => {
            fail(
                pool,
                job.id,
                JobState::Processed,
                &format!("E-transfer staging failed: {e:#}"),
                actor,
            )
            .await
        }
    }
}

/// Check one Transferring job against the pickup directories and the
/// archive. Files still in the pickup directories mean the transfer is in
/// progress; rejected files park the job in Error; files gone from the
/// directories must be confirmed present at the archive with a matching
/// checksum before the job advances to Ingestion.
pub async fn poll_transferring(
    pool: &SqlitePool,
    config: &Config,
    archive: &dyn ArchiveClient,
    job: &Job,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    let outputs = job_service::get_output_files(pool, job.id).await?;
    if outputs.is_empty() {
        return fail(
            pool,
            job.id,
            JobState::Transferring,
            "No output files recorded for transferring job",
            actor,
        )
        .await;
    }

    let mut in_progress = false;
    let mut rejected = Vec::new();

    for output in &outputs {
        match transfer_status(&config.etransfer_trans_dir, &output.filename) {
            TransferStatus::InProgress => in_progress = true,
            TransferStatus::Rejected(reason) => {
                rejected.push(format!("{} ({})", output.filename, reason));
            }
            TransferStatus::Gone => {}
        }
    }

    if !rejected.is_empty() {
        return fail(
            pool,
            job.id,
            JobState::Transferring,
            &format!("Files rejected by e-transfer: {}", rejected.join(", ")),
            actor,
        )
        .await;
    }

    if in_progress {
        tracing::debug!("Job {} still has files in e-transfer", job.id);
        return Ok(Outcome::Skipped);
    }

    // Everything has left the pickup directories; confirm at the archive.
    let (tries, delay) = retry_policy(pool, config, &job.task).await?;
    let mut lost = Vec::new();

    for output in &outputs {
        let info = match with_retries(tries, delay, || {
            bounded(config.external_timeout, archive.file_info(&output.filename))
        })
        .await
        {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(
                    "Archive verification failed for job {}: {}",
                    job.id,
                    e
                );
                return Ok(Outcome::Failed);
            }
        };

        match info {
            None => lost.push(format!("{} (not in archive)", output.filename)),
            Some(remote) => {
                if let (Some(local), Some(archived)) = (&output.checksum, &remote.checksum) {
                    if local != archived {
                        lost.push(format!("{} (checksum mismatch)", output.filename));
                    }
                }
            }
        }
    }

    if !lost.is_empty() {
        return fail(
            pool,
            job.id,
            JobState::Transferring,
            &format!("Output files lost or corrupt after e-transfer: {}", lost.join(", ")),
            actor,
        )
        .await;
    }

    advance(
        pool,
        job.id,
        JobState::Transferring,
        JobState::Ingestion,
        "Output files confirmed at archive",
        actor,
    )
    .await
}

async fn stage_files(
    pool: &SqlitePool,
    config: &Config,
    archive: &dyn ArchiveClient,
    job: &Job,
    outputs: &[OutputFile],
) -> anyhow::Result<usize> {
    let output_dir = directories::output_dir(config, job.id);
    let scratch = &config.etransfer_scratch_dir;
    let trans = &config.etransfer_trans_dir;

    directories::ensure_dir(scratch).await?;
    for sub in ["new", "replace"] {
        directories::ensure_dir(&trans.join(sub)).await?;
    }

    for output in outputs {
        let name = &output.filename;

        if !output_dir.join(name).is_file() {
            anyhow::bail!("output file {} not in {}", name, output_dir.display());
        }
        if scratch.join(name).exists() {
            anyhow::bail!("file {name} is already in the e-transfer scratch directory");
        }
        for sub in ["new", "replace"] {
            if trans.join(sub).join(name).exists() {
                anyhow::bail!("file {name} is already in the e-transfer {sub} directory");
            }
        }
    }

    let (tries, delay) = retry_policy(pool, config, &job.task).await?;
    let mut staged = 0;

    for output in outputs {
        let name = &output.filename;

        let info = with_retries(tries, delay, || {
            bounded(config.external_timeout, archive.file_info(name))
        })
        .await
        .with_context(|| format!("archive lookup for {name}"))?;

        let target_sub = match info {
            Some(remote)
                if output.checksum.is_some() && remote.checksum == output.checksum =>
            {
                tracing::info!("File {} is unchanged at archive; skipping", name);
                continue;
            }
            Some(_) => "replace",
            None => "new",
        };

        let source = output_dir.join(name);
        let scratch_file = scratch.join(name);
        let target = trans.join(target_sub).join(name);

        tokio::fs::copy(&source, &scratch_file)
            .await
            .with_context(|| format!("staging {name}"))?;
        tokio::fs::rename(&scratch_file, &target)
            .await
            .with_context(|| format!("moving {name} into the {target_sub} directory"))?;

        tracing::info!("Placed {} in the e-transfer {} directory", name, target_sub);
        staged += 1;
    }

    Ok(staged)
}

fn transfer_status(trans_dir: &Path, filename: &str) -> TransferStatus {
    for sub in ["new", "replace"] {
        if trans_dir.join(sub).join(filename).exists() {
            return TransferStatus::InProgress;
        }
    }

    let reject_root = trans_dir.join("reject");
    if let Ok(entries) = std::fs::read_dir(&reject_root) {
        for entry in entries.flatten() {
            if entry.path().join(filename).exists() {
                let reason = entry.file_name().to_string_lossy().into_owned();
                return TransferStatus::Rejected(reason);
            }
        }
    }

    TransferStatus::Gone
}
