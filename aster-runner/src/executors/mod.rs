//! Action executors
//!
//! One module per pipeline stage. Executors share a common shape: select
//! eligible jobs in fairness order, claim one with a conditioned state
//! change, perform the external side effect under a bounded timeout, then
//! write the completion or failure transition. Losing a claim race is
//! normal operation, reported as `Outcome::Skipped` rather than an error.

pub mod clean;
pub mod etransfer;
pub mod fetch;
pub mod ingest;
pub mod rawingest;
pub mod reset;
pub mod run;
pub mod transfer;
pub mod validate;

use std::time::Duration;

use aster_core::domain::job::Job;
use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::repository::{job_repository, task_repository};
use aster_registry::service::job_service;
use sqlx::SqlitePool;

use crate::config::Config;

/// Result of one executor invocation on one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The job moved to this state (`Error` counts: the failure was
    /// recorded and the job is parked for operator attention).
    Advanced(JobState),
    /// Nothing changed: the job was not eligible, the claim was lost to a
    /// concurrent worker, or a resource guard refused the work.
    Skipped,
    /// The attempt failed without touching the job; the next poll pass
    /// retries it.
    Failed,
}

/// Next job in the given state at the given location, by fairness order.
pub(crate) async fn next_eligible(
    pool: &SqlitePool,
    state: JobState,
    location: &str,
) -> Result<Option<Job>, RegistryError> {
    let jobs = job_service::find_jobs(
        pool,
        &job_repository::JobQuery {
            state: Some(state),
            location: Some(location.to_string()),
            limit: Some(1),
            ..Default::default()
        },
    )
    .await?;

    Ok(jobs.into_iter().next())
}

/// Conditioned state change treating a lost race as a skip, not an error.
///
/// Returns whether this process performed the transition.
pub(crate) async fn claim(
    pool: &SqlitePool,
    job_id: i64,
    from: JobState,
    to: JobState,
    message: &str,
    force: bool,
    actor: &Actor,
) -> Result<bool, RegistryError> {
    let prev = if force { None } else { Some(from) };

    match job_service::change_state(pool, job_id, to, message, prev, actor).await {
        Ok(()) => Ok(true),
        Err(RegistryError::StateConflict { actual, .. }) => {
            tracing::warn!(
                "Job {} not moved {} -> {}: another process moved it to {}",
                job_id,
                from,
                to,
                actual
            );
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Advance a job, mapping a lost race to `Outcome::Skipped`.
pub(crate) async fn advance(
    pool: &SqlitePool,
    job_id: i64,
    from: JobState,
    to: JobState,
    message: &str,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    if claim(pool, job_id, from, to, message, false, actor).await? {
        Ok(Outcome::Advanced(to))
    } else {
        Ok(Outcome::Skipped)
    }
}

/// Record a failure: move the job to Error with the message verbatim.
pub(crate) async fn fail(
    pool: &SqlitePool,
    job_id: i64,
    from: JobState,
    message: &str,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    tracing::error!("Job {} failed in {}: {}", job_id, from, message);
    advance(pool, job_id, from, JobState::Error, message, actor).await
}

/// Retry policy for a task: per-task overrides from the registry, runner
/// configuration as the default.
pub(crate) async fn retry_policy(
    pool: &SqlitePool,
    config: &Config,
    task: &str,
) -> Result<(u32, Duration), RegistryError> {
    let info = task_repository::get(pool, task).await?;

    let tries = info
        .as_ref()
        .and_then(|t| t.max_tries)
        .map(|n| n as u32)
        .unwrap_or(config.max_tries)
        .max(1);
    let delay = info
        .as_ref()
        .and_then(|t| t.retry_delay_secs)
        .map(|s| Duration::from_secs(s as u64))
        .unwrap_or(config.retry_delay);

    Ok((tries, delay))
}
