//! Run executor
//!
//! Claims a Waiting job, re-verifies its assembled inputs, and launches
//! the reduction recipe. Inputs that vanished between fetch and run send
//! the job back to Missing a bounded number of times before it is parked
//! in Error for operator attention.

use aster_core::domain::job::Job;
use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::repository::{log_repository, task_repository};
use aster_registry::service::job_service;
use sqlx::SqlitePool;

use super::{Outcome, advance, claim, fail, next_eligible};
use crate::config::Config;
use crate::directories;
use crate::external::bounded;
use crate::external::recipe::{RecipeContext, RecipeRunner};
use crate::namecheck;
use crate::util;

/// Run the next Waiting job at this site, if any.
pub async fn run_next(
    pool: &SqlitePool,
    config: &Config,
    recipe: &dyn RecipeRunner,
    actor: &Actor,
) -> Result<Option<(i64, Outcome)>, RegistryError> {
    let Some(job) = next_eligible(pool, JobState::Waiting, &config.location).await? else {
        tracing::debug!("No job waiting to run");
        return Ok(None);
    };

    let outcome = run_job(pool, config, recipe, &job, false, actor).await?;
    Ok(Some((job.id, outcome)))
}

/// Execute the reduction recipe for one job.
pub async fn run_job(
    pool: &SqlitePool,
    config: &Config,
    recipe: &dyn RecipeRunner,
    job: &Job,
    force: bool,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    if !claim(
        pool,
        job.id,
        JobState::Waiting,
        JobState::Running,
        &format!("Recipe started on host {}", actor.host),
        force,
        actor,
    )
    .await?
    {
        return Ok(Outcome::Skipped);
    }

    let list_path = directories::input_list_path(config, job.id);
    let listed: Vec<String> = match tokio::fs::read_to_string(&list_path).await {
        Ok(content) => content.lines().map(str::to_string).collect(),
        Err(e) => {
            return fail(
                pool,
                job.id,
                JobState::Running,
                &format!("Input file list {} unreadable: {}", list_path.display(), e),
                actor,
            )
            .await;
        }
    };

    let vanished: Vec<&str> = listed
        .iter()
        .map(String::as_str)
        .filter(|path| !std::path::Path::new(path).is_file())
        .collect();

    if !vanished.is_empty() {
        let requeues = log_repository::count_entries_into(pool, job.id, JobState::Missing).await?;

        if requeues <= config.max_missing_requeue {
            return advance(
                pool,
                job.id,
                JobState::Running,
                JobState::Missing,
                &format!(
                    "Input files vanished before run: {}; requeueing fetch",
                    vanished.join(", ")
                ),
                actor,
            )
            .await;
        }

        return fail(
            pool,
            job.id,
            JobState::Running,
            &format!(
                "Input files repeatedly vanished: {}; giving up",
                vanished.join(", ")
            ),
            actor,
        )
        .await;
    }

    let task_info = task_repository::get(pool, &job.task).await?;

    let scratch_dir = directories::scratch_dir(config, job.id);
    let output_dir = directories::output_dir(config, job.id);
    let log_dir = directories::log_dir(config, job.id);
    for dir in [&scratch_dir, &output_dir, &log_dir] {
        if let Err(e) = directories::ensure_dir(dir).await {
            return fail(
                pool,
                job.id,
                JobState::Running,
                &format!("Cannot create {}: {}", dir.display(), e),
                actor,
            )
            .await;
        }
    }

    let ctx = RecipeContext {
        job_id: job.id,
        input_list: list_path,
        mode: job.mode,
        parameters: job.parameters.clone(),
        scratch_dir,
        output_dir: output_dir.clone(),
        log_dir,
        starlink_dir: task_info.as_ref().and_then(|t| t.starlink_dir.clone()),
        command: task_info.as_ref().and_then(|t| t.command_run.clone()),
    };

    tracing::info!("Running recipe for job {} (task {})", job.id, job.task);

    let outcome = bounded(config.recipe_timeout, recipe.run(&ctx)).await;

    match outcome {
        Ok(result) => {
            let mut files = Vec::with_capacity(result.output_files.len());
            for name in &result.output_files {
                let checksum = match util::checksum_file(&output_dir.join(name)) {
                    Ok(sum) => Some(sum),
                    Err(e) => {
                        tracing::warn!("Cannot checksum output {}: {}", name, e);
                        None
                    }
                };
                files.push((name.clone(), checksum));
            }

            job_service::set_output_files(pool, job.id, &files).await?;

            if job.task.starts_with("hpx-") {
                let tiles = namecheck::tiles_from_filenames(&result.output_files);
                job_service::set_tilelist(pool, job.id, &tiles).await?;
                tracing::debug!("Job {} produced output on tiles {:?}", job.id, tiles);
            }

            advance(
                pool,
                job.id,
                JobState::Running,
                JobState::Processed,
                &format!(
                    "Job successfully processed ({} output files)",
                    result.output_files.len()
                ),
                actor,
            )
            .await
        }
        Err(e) => {
            fail(
                pool,
                job.id,
                JobState::Running,
                &format!("Recipe run failed: {e}"),
                actor,
            )
            .await
        }
    }
}
