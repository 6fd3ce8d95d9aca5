//! Ingest executor
//!
//! Final stage: hand the transferred output to the archive's ingestion
//! system. Transient failures requeue the job to Ingestion within the
//! task's retry budget; exhausting the budget parks the job in Error for
//! operator attention. The audit trail is the attempt counter.

use std::process::Stdio;

use aster_core::domain::job::Job;
use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::repository::{log_repository, task_repository};
use aster_registry::service::job_service;
use sqlx::SqlitePool;

use super::{Outcome, advance, claim, fail, next_eligible, retry_policy};
use crate::config::Config;
use crate::directories;
use crate::external::archive::ArchiveClient;
use crate::external::{ExternalError, ExternalResult, bounded};

/// Ingest the next eligible job at this site, if any.
pub async fn ingest_next(
    pool: &SqlitePool,
    config: &Config,
    archive: &dyn ArchiveClient,
    actor: &Actor,
) -> Result<Option<(i64, Outcome)>, RegistryError> {
    let Some(job) = next_eligible(pool, JobState::Ingestion, &config.location).await? else {
        tracing::debug!("No job waiting for ingestion");
        return Ok(None);
    };

    let outcome = ingest_job(pool, config, archive, &job, false, actor).await?;
    Ok(Some((job.id, outcome)))
}

/// Run archive ingestion for one job.
pub async fn ingest_job(
    pool: &SqlitePool,
    config: &Config,
    archive: &dyn ArchiveClient,
    job: &Job,
    force: bool,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    if !claim(
        pool,
        job.id,
        JobState::Ingestion,
        JobState::Ingesting,
        "Archive ingestion started",
        force,
        actor,
    )
    .await?
    {
        return Ok(Outcome::Skipped);
    }

    let task_info = task_repository::get(pool, &job.task).await?;
    let (max_tries, _) = retry_policy(pool, config, &job.task).await?;

    let result = match task_info.as_ref().and_then(|t| t.command_ingest.as_deref()) {
        Some(command) => {
            bounded(
                config.external_timeout,
                run_ingest_command(config, job, command),
            )
            .await
        }
        None => {
            bounded(
                config.external_timeout,
                confirm_outputs_archived(pool, archive, job),
            )
            .await
        }
    };

    match result {
        Ok(()) => {
            advance(
                pool,
                job.id,
                JobState::Ingesting,
                JobState::Complete,
                "Job ingested into archive",
                actor,
            )
            .await
        }
        Err(e) => {
            let attempts =
                log_repository::count_entries_into(pool, job.id, JobState::Ingesting).await?;

            if attempts < max_tries as i64 {
                advance(
                    pool,
                    job.id,
                    JobState::Ingesting,
                    JobState::Ingestion,
                    &format!("Ingestion attempt {attempts} failed: {e}; will retry"),
                    actor,
                )
                .await
            } else {
                fail(
                    pool,
                    job.id,
                    JobState::Ingesting,
                    &format!("Ingestion failed after {attempts} attempts: {e}"),
                    actor,
                )
                .await
            }
        }
    }
}

async fn run_ingest_command(config: &Config, job: &Job, command: &str) -> ExternalResult<()> {
    let output_dir = directories::output_dir(config, job.id);
    let log_dir = directories::log_dir(config, job.id);

    let run = async {
        directories::ensure_dir(&log_dir).await?;
        let log_file = log_dir.join(format!("ingest_{:09}.log", job.id));
        let log = std::fs::File::create(&log_file)?;
        let log_err = log.try_clone()?;

        let status = tokio::process::Command::new(command)
            .arg("--transdir")
            .arg(&output_dir)
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .status()
            .await?;

        if !status.success() {
            return Err(anyhow::anyhow!(
                "ingest command exited with status {status}; see {}",
                log_file.display()
            ));
        }

        Ok(())
    };

    run.await.map_err(|e: anyhow::Error| ExternalError::service(format!("{e:#}")))
}

/// Archive-managed ingestion: confirm every recorded output file is
/// present in the archive.
async fn confirm_outputs_archived(
    pool: &SqlitePool,
    archive: &dyn ArchiveClient,
    job: &Job,
) -> ExternalResult<()> {
    let outputs = job_service::get_output_files(pool, job.id)
        .await
        .map_err(|e| ExternalError::service(e.to_string()))?;

    if outputs.is_empty() {
        return Err(ExternalError::Rejected(
            "no output files recorded for ingestion".into(),
        ));
    }

    for output in outputs {
        let info = archive.file_info(&output.filename).await?;
        if info.is_none() {
            return Err(ExternalError::service(format!(
                "output file {} not yet in archive",
                output.filename
            )));
        }
    }

    Ok(())
}
