//! Clean executor
//!
//! Reclaims scratch and input directories of jobs that no longer need
//! them. Registry rows are never touched: jobs are retained for audit,
//! only their working files are reclaimed.

use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::repository::job::JobQuery;
use aster_registry::service::job_service;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::directories;

/// States whose jobs no longer need their input and scratch directories.
pub const CLEANABLE_STATES: [JobState; 4] = [
    JobState::Ingestion,
    JobState::Complete,
    JobState::Deleted,
    JobState::WontWork,
];

/// Delete input and scratch directories for jobs past the run phase.
///
/// Returns how many jobs had directories reclaimed. `limit` bounds the
/// work of one pass; `dry_run` only reports what would be removed.
pub async fn clean_job_dirs(
    pool: &SqlitePool,
    config: &Config,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<usize, RegistryError> {
    let mut cleaned = 0;

    for state in CLEANABLE_STATES {
        let jobs = job_service::find_jobs(
            pool,
            &JobQuery {
                state: Some(state),
                location: Some(config.location.clone()),
                ..Default::default()
            },
        )
        .await?;

        for job in jobs {
            let dirs = [
                directories::input_dir(config, job.id),
                directories::scratch_dir(config, job.id),
            ];

            let mut removed_any = false;
            for dir in dirs {
                if !dir.exists() {
                    continue;
                }

                if dry_run {
                    tracing::info!("DRY RUN: would remove {}", dir.display());
                    removed_any = true;
                    continue;
                }

                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => {
                        tracing::info!("Removed {}", dir.display());
                        removed_any = true;
                    }
                    Err(e) => {
                        tracing::warn!("Could not remove {}: {}", dir.display(), e);
                    }
                }
            }

            if removed_any {
                cleaned += 1;
                if let Some(limit) = limit {
                    if cleaned >= limit {
                        return Ok(cleaned);
                    }
                }
            }
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::tests::test_env;
    use aster_registry::repository::job::NewJob;
    use aster_core::domain::job::ProcessingMode;
    use aster_core::domain::log::Actor;

    #[tokio::test]
    async fn test_clean_removes_only_finished_jobs() {
        let (pool, config, _guard) = test_env("clean").await;
        let actor = Actor::new("testhost", "testuser");

        let make_job = |tag: &str| NewJob {
            tag: tag.to_string(),
            location: "JAC".to_string(),
            foreign_id: None,
            mode: ProcessingMode::Obs,
            parameters: String::new(),
            priority: 0,
            task: "t1".to_string(),
            instrument: None,
        };

        let done = job_service::create_job(&pool, &make_job("clean-done"), &[], &[])
            .await
            .unwrap();
        let fresh = job_service::create_job(&pool, &make_job("clean-fresh"), &[], &[])
            .await
            .unwrap();

        // Drive one job to a cleanable terminal state.
        for (to, from) in [
            (JobState::Queued, JobState::Unknown),
            (JobState::Waiting, JobState::Queued),
            (JobState::Running, JobState::Waiting),
            (JobState::Processed, JobState::Running),
            (JobState::Complete, JobState::Processed),
        ] {
            job_service::change_state(&pool, done, to, "advance", Some(from), &actor)
                .await
                .unwrap();
        }

        for id in [done, fresh] {
            directories::ensure_dir(&directories::input_dir(&config, id))
                .await
                .unwrap();
            directories::ensure_dir(&directories::scratch_dir(&config, id))
                .await
                .unwrap();
        }

        let cleaned = clean_job_dirs(&pool, &config, None, false).await.unwrap();
        assert_eq!(cleaned, 1);
        assert!(!directories::input_dir(&config, done).exists());
        assert!(!directories::scratch_dir(&config, done).exists());
        assert!(directories::input_dir(&config, fresh).exists());

        // Dry run reports but removes nothing.
        let cleaned = clean_job_dirs(&pool, &config, None, true).await.unwrap();
        assert_eq!(cleaned, 0);
        assert!(directories::input_dir(&config, fresh).exists());
    }
}
