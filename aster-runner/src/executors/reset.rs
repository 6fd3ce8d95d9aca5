//! Reset executor
//!
//! Bulk operator recovery: send selected jobs back to Queued. Active jobs
//! are skipped unless forced, and skipping any makes the whole operation
//! report failure so the operator notices.

use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::repository::job::JobQuery;
use aster_registry::service::job_service;
use sqlx::SqlitePool;

use crate::config::Config;

/// Which jobs a bulk reset applies to.
#[derive(Debug, Clone, Default)]
pub struct ResetSelection {
    pub task: Option<String>,
    pub state: Option<JobState>,
    pub instrument: Option<String>,
    pub added_after: Option<chrono::DateTime<chrono::Utc>>,
    pub added_before: Option<chrono::DateTime<chrono::Utc>>,
}

/// Reset the selected jobs back to Queued.
///
/// Returns how many jobs were reset. Fails with a validation error when
/// any active job had to be skipped (unless `force` was given).
pub async fn reset_jobs(
    pool: &SqlitePool,
    config: &Config,
    selection: &ResetSelection,
    force: bool,
    dry_run: bool,
    actor: &Actor,
) -> Result<usize, RegistryError> {
    let jobs = job_service::find_jobs(
        pool,
        &JobQuery {
            task: selection.task.clone(),
            state: selection.state,
            location: Some(config.location.clone()),
            instrument: selection.instrument.clone(),
            added_after: selection.added_after,
            added_before: selection.added_before,
            ..Default::default()
        },
    )
    .await?;

    let mut n_reset = 0;
    let mut n_active = 0;

    for job in jobs {
        if job.state.is_terminal() || job.state == JobState::Queued {
            continue;
        }

        if job.state.is_active() && !force {
            tracing::warn!("Skipping active job {} ({})", job.id, job.state);
            n_active += 1;
            continue;
        }

        if dry_run {
            tracing::info!("DRY RUN: would reset job {} (was {})", job.id, job.state);
            continue;
        }

        tracing::info!("Resetting job {} (was {})", job.id, job.state);
        job_service::reset_job(pool, job.id, force, actor).await?;
        n_reset += 1;
    }

    if n_active > 0 {
        return Err(RegistryError::Validation(format!(
            "could not reset {n_active} active jobs (use force to override)"
        )));
    }

    Ok(n_reset)
}
