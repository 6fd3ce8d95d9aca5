//! Transfer executor
//!
//! Decides what happens to a Processed job based on its task
//! configuration: a custom transfer command, the e-transfer staging flow,
//! direct completion when transfer is disabled, or nothing at all when
//! the task is not configured yet.

use std::process::Stdio;

use aster_core::domain::job::Job;
use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::repository::task_repository;
use aster_registry::service::job_service;
use sqlx::SqlitePool;

use super::{Outcome, advance, claim, etransfer, fail};
use crate::config::Config;
use crate::directories;
use crate::external::archive::ArchiveClient;
use crate::external::{ExternalError, ExternalResult, bounded};

/// Move one Processed job onward according to its task configuration.
pub async fn transfer_processed(
    pool: &SqlitePool,
    config: &Config,
    archive: &dyn ArchiveClient,
    job: &Job,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    let Some(task_info) = task_repository::get(pool, &job.task).await? else {
        tracing::debug!(
            "Processed job {} unchanged: task {} has no configuration",
            job.id,
            job.task
        );
        return Ok(Outcome::Skipped);
    };

    if let Some(command) = task_info.command_xfer.clone() {
        return custom_transfer(pool, config, job, &command, actor).await;
    }

    match task_info.etransfer {
        None => {
            tracing::debug!(
                "Processed job {} unchanged: task {} e-transfer is undecided",
                job.id,
                job.task
            );
            Ok(Outcome::Skipped)
        }
        Some(false) => {
            if let Some(missing) = missing_output(pool, config, job).await? {
                return fail(
                    pool,
                    job.id,
                    JobState::Processed,
                    &format!("Output file {missing} is missing; cannot complete"),
                    actor,
                )
                .await;
            }

            advance(
                pool,
                job.id,
                JobState::Processed,
                JobState::Complete,
                "Processed job is complete (no e-transfer)",
                actor,
            )
            .await
        }
        Some(true) => etransfer::send_output(pool, config, archive, job, false, actor).await,
    }
}

async fn custom_transfer(
    pool: &SqlitePool,
    config: &Config,
    job: &Job,
    command: &str,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    if !claim(
        pool,
        job.id,
        JobState::Processed,
        JobState::Transferring,
        "Transferring via custom command",
        false,
        actor,
    )
    .await?
    {
        return Ok(Outcome::Skipped);
    }

    let result = bounded(
        config.external_timeout,
        run_transfer_command(config, job, command),
    )
    .await;

    match result {
        Ok(()) => {
            advance(
                pool,
                job.id,
                JobState::Transferring,
                JobState::Complete,
                "Custom transfer completed successfully",
                actor,
            )
            .await
        }
        Err(e) => {
            fail(
                pool,
                job.id,
                JobState::Transferring,
                &format!("Custom transfer failed: {e}"),
                actor,
            )
            .await
        }
    }
}

async fn run_transfer_command(
    config: &Config,
    job: &Job,
    command: &str,
) -> ExternalResult<()> {
    let output_dir = directories::output_dir(config, job.id);
    let log_dir = directories::log_dir(config, job.id);

    let run = async {
        directories::ensure_dir(&log_dir).await?;
        let log_file = log_dir.join(format!("transfer_{:09}.log", job.id));
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
                "transfer command exited with status {status}; see {}",
                log_file.display()
            ));
        }

        Ok(())
    };

    run.await.map_err(|e: anyhow::Error| ExternalError::service(format!("{e:#}")))
}

async fn missing_output(
    pool: &SqlitePool,
    config: &Config,
    job: &Job,
) -> Result<Option<String>, RegistryError> {
    let output_dir = directories::output_dir(config, job.id);

    for output in job_service::get_output_files(pool, job.id).await? {
        if !output_dir.join(&output.filename).is_file() {
            return Ok(Some(output.filename));
        }
    }

    Ok(None)
}
