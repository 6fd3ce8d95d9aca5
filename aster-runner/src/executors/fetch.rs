//! Fetch executor
//!
//! Assembles the files a job needs into its input directory: raw inputs
//! from the archive, plus the filtered outputs of any parent jobs. The
//! assembly is idempotent: files already present are never fetched or
//! copied again, so re-invoking after a partial failure completes the
//! remainder.

use anyhow::Context;
use aster_core::domain::job::Job;
use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::service::job_service;
use regex::Regex;
use sqlx::SqlitePool;

use super::{Outcome, advance, claim, fail, next_eligible, retry_policy};
use crate::config::Config;
use crate::directories;
use crate::external::archive::ArchiveClient;
use crate::external::{bounded, with_retries};
use crate::util;

/// Fetch the next Missing job at this site, if any.
pub async fn fetch_next(
    pool: &SqlitePool,
    config: &Config,
    archive: &dyn ArchiveClient,
    actor: &Actor,
) -> Result<Option<(i64, Outcome)>, RegistryError> {
    let Some(job) = next_eligible(pool, JobState::Missing, &config.location).await? else {
        tracing::debug!("No job waiting for fetch");
        return Ok(None);
    };

    let outcome = fetch_job(pool, config, archive, &job, false, actor).await?;
    Ok(Some((job.id, outcome)))
}

/// Assemble the input data for one job.
///
/// Claims `Missing -> Fetching`, assembles, then advances to `Waiting`.
/// Any failure or timeout moves the job to `Error` with the reason
/// verbatim in the audit trail.
pub async fn fetch_job(
    pool: &SqlitePool,
    config: &Config,
    archive: &dyn ArchiveClient,
    job: &Job,
    force: bool,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    if let Some(limit) = config.fetch_usage_limit {
        let used = util::dir_size(&config.base_dir.join("input")).unwrap_or(0);
        if used > limit {
            tracing::warn!(
                "Input tree uses {} bytes (limit {}); deferring fetch of job {}",
                used,
                limit,
                job.id
            );
            return Ok(Outcome::Skipped);
        }
    }

    if !claim(
        pool,
        job.id,
        JobState::Missing,
        JobState::Fetching,
        "Assembling input data",
        force,
        actor,
    )
    .await?
    {
        return Ok(Outcome::Skipped);
    }

    match assemble(pool, config, archive, job).await {
        Ok(count) => {
            advance(
                pool,
                job.id,
                JobState::Fetching,
                JobState::Waiting,
                &format!("Input data assembled ({count} files)"),
                actor,
            )
            .await
        }
        Err(e) => {
            fail(
                pool,
                job.id,
                JobState::Fetching,
                &format!("Fetch failed: {e:#}"),
                actor,
            )
            .await
        }
    }
}

async fn assemble(
    pool: &SqlitePool,
    config: &Config,
    archive: &dyn ArchiveClient,
    job: &Job,
) -> anyhow::Result<usize> {
    let input_dir = directories::input_dir(config, job.id);
    directories::ensure_dir(&input_dir).await?;

    let (tries, delay) = retry_policy(pool, config, &job.task).await?;

    let mut assembled = Vec::new();

    for filename in job_service::get_input_files(pool, job.id).await? {
        let dest = input_dir.join(&filename);

        if !dest.exists() {
            with_retries(tries, delay, || {
                bounded(config.external_timeout, archive.fetch_file(&filename, &input_dir))
            })
            .await
            .with_context(|| format!("fetching {filename}"))?;

            tracing::debug!("Fetched {} for job {}", filename, job.id);
        }

        assembled.push(dest);
    }

    for link in job_service::get_parents(pool, job.id).await? {
        let filter = link
            .filter
            .as_deref()
            .map(Regex::new)
            .transpose()
            .with_context(|| format!("parent {} has an invalid filter", link.parent_id))?;

        let parent_out = directories::output_dir(config, link.parent_id);

        for output in job_service::get_output_files(pool, link.parent_id).await? {
            if let Some(filter) = &filter {
                if !filter.is_match(&output.filename) {
                    continue;
                }
            }

            let src = parent_out.join(&output.filename);
            let dest = input_dir.join(&output.filename);

            if !dest.exists() {
                tokio::fs::copy(&src, &dest).await.with_context(|| {
                    format!(
                        "copying {} from parent job {}",
                        output.filename, link.parent_id
                    )
                })?;
            }

            assembled.push(dest);
        }
    }

    if assembled.is_empty() {
        anyhow::bail!("no input files could be assembled");
    }

    write_input_list(config, job.id, &assembled).await?;

    Ok(assembled.len())
}

/// Write the input list file atomically (write-then-rename on the same
/// filesystem) so a crashed fetch never leaves a half-written list.
pub(crate) async fn write_input_list(
    config: &Config,
    job_id: i64,
    files: &[std::path::PathBuf],
) -> anyhow::Result<()> {
    let list_path = directories::input_list_path(config, job_id);
    let partial = list_path.with_extension("lis.part");

    let mut content = String::new();
    for file in files {
        content.push_str(&file.display().to_string());
        content.push('\n');
    }

    tokio::fs::write(&partial, content).await?;
    tokio::fs::rename(&partial, &list_path).await?;

    Ok(())
}
