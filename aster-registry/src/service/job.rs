//! Job Service
//!
//! Creation, lookup, and the state-change contract. `change_state` is the
//! only way any executor may advance a job: the conditioned update plus
//! audit insert run in one transaction, so a concurrent claimer observes
//! either the old state or the new state and its log row, never a torn
//! mixture.

use aster_core::domain::job::{Job, OutputFile, ParentLink};
use aster_core::domain::log::{Actor, LogEntry};
use aster_core::domain::state::JobState;
use aster_core::error::StateError;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{RegistryError, Result};
use crate::repository::{
    file_repository, job_repository, log_repository, parent_repository, tile_repository,
};

pub use crate::repository::job::{JobQuery, NewJob};

/// Create a new job in the initial Unknown state, recording its input
/// files and parent dependencies.
///
/// Fails with `DuplicateTag` when the tag is already taken; the registry
/// is left unchanged in that case.
pub async fn create_job(
    pool: &SqlitePool,
    new: &NewJob,
    input_files: &[String],
    parents: &[(i64, Option<String>)],
) -> Result<i64> {
    if new.tag.trim().is_empty() {
        return Err(RegistryError::Validation("job tag must not be empty".into()));
    }
    if new.task.trim().is_empty() {
        return Err(RegistryError::Validation(
            "job task must not be empty".into(),
        ));
    }

    let mut tx = pool.begin().await?;

    if job_repository::find_by_tag(&mut *tx, &new.tag).await?.is_some() {
        return Err(RegistryError::DuplicateTag(new.tag.clone()));
    }

    let job_id = job_repository::create(&mut *tx, new)
        .await
        .map_err(|e| map_unique_violation(e, &new.tag))?;

    for filename in input_files {
        file_repository::add_input(&mut *tx, job_id, filename).await?;
    }

    for (parent_id, filter) in parents {
        parent_repository::add(&mut *tx, job_id, *parent_id, filter.as_deref()).await?;
    }

    tx.commit().await?;

    tracing::info!("Job {} created with tag {:?}", job_id, new.tag);

    Ok(job_id)
}

/// Get a job by id.
pub async fn get_job(pool: &SqlitePool, id: i64) -> Result<Job> {
    job_repository::find_by_id(pool, id)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("id {id}")))
}

/// Get a job by its unique tag.
pub async fn get_job_by_tag(pool: &SqlitePool, tag: &str) -> Result<Job> {
    job_repository::find_by_tag(pool, tag)
        .await?
        .ok_or_else(|| RegistryError::NotFound(format!("tag {tag:?}")))
}

/// Find jobs in scheduling fairness order (priority descending, then id
/// ascending).
pub async fn find_jobs(pool: &SqlitePool, query: &JobQuery) -> Result<Vec<Job>> {
    Ok(job_repository::find(pool, query).await?)
}

/// Change the state of a job, appending the matching audit row in the
/// same transaction.
///
/// When `prev_state` is `Some`, the update only applies if the job is
/// still in that state; otherwise the call fails with `StateConflict` and
/// the registry is untouched. Every executor that read a state, did work,
/// and is now writing the outcome must pass the state it read here.
///
/// `prev_state = None` is the forced variant for operator actions; it
/// bypasses both the check and the transition table but still writes the
/// audit row.
pub async fn change_state(
    pool: &SqlitePool,
    job_id: i64,
    new_state: JobState,
    message: &str,
    prev_state: Option<JobState>,
    actor: &Actor,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    apply_state_change(&mut tx, job_id, new_state, message, prev_state, actor).await?;

    tx.commit().await?;

    tracing::debug!(
        "Job {} moved to {} ({})",
        job_id,
        new_state,
        if prev_state.is_some() { "checked" } else { "forced" }
    );

    Ok(())
}

/// Transaction-level body of `change_state`, shared with the submission
/// upsert so parent rewrites and the state reset commit atomically.
pub(crate) async fn apply_state_change(
    conn: &mut SqliteConnection,
    job_id: i64,
    new_state: JobState,
    message: &str,
    prev_state: Option<JobState>,
    actor: &Actor,
) -> Result<()> {
    let logged_prev = match prev_state {
        Some(expected) => {
            if !expected.can_transition(new_state) {
                return Err(StateError::InvalidTransition {
                    from: expected,
                    to: new_state,
                }
                .into());
            }

            let changed =
                job_repository::update_state_checked(&mut *conn, job_id, new_state, expected)
                    .await?;

            if !changed {
                return match job_repository::current_state(&mut *conn, job_id).await? {
                    Some(actual) => Err(RegistryError::StateConflict {
                        job_id,
                        expected,
                        actual,
                    }),
                    None => Err(RegistryError::NotFound(format!("id {job_id}"))),
                };
            }

            expected
        }
        None => {
            let current = job_repository::current_state(&mut *conn, job_id)
                .await?
                .ok_or_else(|| RegistryError::NotFound(format!("id {job_id}")))?;

            job_repository::update_state_forced(&mut *conn, job_id, new_state).await?;

            current
        }
    };

    log_repository::insert(&mut *conn, job_id, logged_prev, new_state, message, actor).await?;

    Ok(())
}

/// Operator reset back to Queued.
///
/// Terminal jobs are never reset. Jobs in an active state (a worker is
/// presumed to be holding them) are refused unless `force` is set, in
/// which case the reset bypasses the optimistic check and the audit row
/// records that it was forced.
pub async fn reset_job(pool: &SqlitePool, job_id: i64, force: bool, actor: &Actor) -> Result<()> {
    let job = get_job(pool, job_id).await?;

    if job.state.is_terminal() {
        return Err(RegistryError::Validation(format!(
            "job {} is in terminal state {} and cannot be reset",
            job_id, job.state
        )));
    }

    if job.state == JobState::Queued {
        tracing::debug!("Job {} is already queued; nothing to reset", job_id);
        return Ok(());
    }

    if job.state.is_active() && !force {
        return Err(RegistryError::Validation(format!(
            "job {} is in active state {}; refusing to reset without force",
            job_id, job.state
        )));
    }

    if force {
        change_state(
            pool,
            job_id,
            JobState::Queued,
            &format!("Forced reset to Queued from {}", job.state),
            None,
            actor,
        )
        .await
    } else {
        change_state(
            pool,
            job_id,
            JobState::Queued,
            "Reset to Queued",
            Some(job.state),
            actor,
        )
        .await
    }
}

/// The full audit trail of a job, oldest first.
pub async fn get_logs(pool: &SqlitePool, job_id: i64) -> Result<Vec<LogEntry>> {
    log_repository::for_job(pool, job_id).await
}

/// Input filenames recorded for a job.
pub async fn get_input_files(pool: &SqlitePool, job_id: i64) -> Result<Vec<String>> {
    Ok(file_repository::inputs(pool, job_id).await?)
}

/// Output files recorded for a job.
pub async fn get_output_files(pool: &SqlitePool, job_id: i64) -> Result<Vec<OutputFile>> {
    Ok(file_repository::outputs(pool, job_id).await?)
}

/// Record one output file for a job.
pub async fn add_output_file(
    pool: &SqlitePool,
    job_id: i64,
    filename: &str,
    checksum: Option<&str>,
) -> Result<()> {
    if job_repository::find_by_id(pool, job_id).await?.is_none() {
        return Err(RegistryError::NotFound(format!("id {job_id}")));
    }

    Ok(file_repository::add_output(pool, job_id, filename, checksum).await?)
}

/// Add one parent dependency edge to a job.
pub async fn add_parent(
    pool: &SqlitePool,
    job_id: i64,
    parent_id: i64,
    filter: Option<&str>,
) -> Result<()> {
    if job_repository::find_by_id(pool, job_id).await?.is_none() {
        return Err(RegistryError::NotFound(format!("id {job_id}")));
    }
    if job_repository::find_by_id(pool, parent_id).await?.is_none() {
        return Err(RegistryError::NotFound(format!("id {parent_id}")));
    }

    Ok(parent_repository::add(pool, job_id, parent_id, filter).await?)
}

/// Replace the output file list of a job in one transaction.
pub async fn set_output_files(
    pool: &SqlitePool,
    job_id: i64,
    files: &[(String, Option<String>)],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    file_repository::set_outputs(&mut tx, job_id, files).await?;
    tx.commit().await?;
    Ok(())
}

/// Replace the tile list of a job in one transaction.
pub async fn set_tilelist(pool: &SqlitePool, job_id: i64, tiles: &[i64]) -> Result<()> {
    let mut tx = pool.begin().await?;
    tile_repository::set_for_job(&mut tx, job_id, tiles).await?;
    tx.commit().await?;
    Ok(())
}

/// Parent dependency edges of a job.
pub async fn get_parents(pool: &SqlitePool, job_id: i64) -> Result<Vec<ParentLink>> {
    Ok(parent_repository::for_job(pool, job_id).await?)
}

fn map_unique_violation(e: sqlx::Error, tag: &str) -> RegistryError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            if db.message().contains("job.tag") {
                return RegistryError::DuplicateTag(tag.to_string());
            }
            return RegistryError::Validation(format!(
                "foreign id already claimed by another job: {}",
                db.message()
            ));
        }
    }
    e.into()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aster_core::domain::job::ProcessingMode;

    pub(crate) fn test_actor() -> Actor {
        Actor::new("testhost", "testuser")
    }

    pub(crate) fn sample_job(tag: &str, task: &str) -> NewJob {
        NewJob {
            tag: tag.to_string(),
            location: "JAC".to_string(),
            foreign_id: None,
            mode: ProcessingMode::Obs,
            parameters: "-recpars default".to_string(),
            priority: 0,
            task: task.to_string(),
            instrument: Some("SCUBA-2".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = crate::db::memory_pool().await;

        let id = create_job(
            &pool,
            &sample_job("obs-20140321-42", "night-850"),
            &["raw_20140321_00042_01.sdf".to_string()],
            &[],
        )
        .await
        .unwrap();

        let job = get_job(&pool, id).await.unwrap();
        assert_eq!(job.tag, "obs-20140321-42");
        assert_eq!(job.state, JobState::Unknown);
        assert_eq!(job.state_prev, JobState::Unknown);
        assert_eq!(job.task, "night-850");

        let files = file_repository::inputs(&pool, id).await.unwrap();
        assert_eq!(files, vec!["raw_20140321_00042_01.sdf".to_string()]);

        // No audit row at creation: the trail records state changes only.
        assert!(get_logs(&pool, id).await.unwrap().is_empty());

        assert!(matches!(
            get_job(&pool, id + 1).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_tag_rejected() {
        let pool = crate::db::memory_pool().await;

        create_job(&pool, &sample_job("dup-tag", "t1"), &[], &[])
            .await
            .unwrap();

        let err = create_job(&pool, &sample_job("dup-tag", "t2"), &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTag(tag) if tag == "dup-tag"));

        // Registry unchanged: still exactly one job.
        let jobs = find_jobs(&pool, &JobQuery::default()).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].task, "t1");
    }

    #[tokio::test]
    async fn test_change_state_records_prev() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        let id = create_job(&pool, &sample_job("prev-check", "t1"), &[], &[])
            .await
            .unwrap();

        change_state(
            &pool,
            id,
            JobState::Queued,
            "Job validated",
            Some(JobState::Unknown),
            &actor,
        )
        .await
        .unwrap();

        let job = get_job(&pool, id).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.state_prev, JobState::Unknown);

        let logs = get_logs(&pool, id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].state_prev, JobState::Unknown);
        assert_eq!(logs[0].state_new, JobState::Queued);
        assert_eq!(logs[0].message, "Job validated");
        assert_eq!(logs[0].host, "testhost");
        assert_eq!(logs[0].username, "testuser");
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        let id = create_job(&pool, &sample_job("bad-move", "t1"), &[], &[])
            .await
            .unwrap();

        // Unknown -> Running is not in the table.
        let err = change_state(
            &pool,
            id,
            JobState::Running,
            "nope",
            Some(JobState::Unknown),
            &actor,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::State(StateError::InvalidTransition { .. })
        ));

        // Rejected, not coerced: no state change, no audit row.
        let job = get_job(&pool, id).await.unwrap();
        assert_eq!(job.state, JobState::Unknown);
        assert!(get_logs(&pool, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_racing_claims_one_winner() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        let id = create_job(&pool, &sample_job("race", "t1"), &[], &[])
            .await
            .unwrap();
        change_state(&pool, id, JobState::Queued, "queued", Some(JobState::Unknown), &actor)
            .await
            .unwrap();
        change_state(&pool, id, JobState::Waiting, "ready", Some(JobState::Queued), &actor)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            change_state(
                &pool,
                id,
                JobState::Running,
                "claimed by runner A",
                Some(JobState::Waiting),
                &actor,
            ),
            change_state(
                &pool,
                id,
                JobState::Running,
                "claimed by runner B",
                Some(JobState::Waiting),
                &actor,
            ),
        );

        let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
        assert!(winner.is_ok());
        assert!(matches!(
            loser.unwrap_err(),
            RegistryError::StateConflict {
                expected: JobState::Waiting,
                actual: JobState::Running,
                ..
            }
        ));

        // Exactly one claim landed: one Running audit row.
        let logs = get_logs(&pool, id).await.unwrap();
        let claims: Vec<_> = logs
            .iter()
            .filter(|l| l.state_new == JobState::Running)
            .collect();
        assert_eq!(claims.len(), 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle_audit_trail() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        let id = create_job(&pool, &sample_job("lifecycle", "t1"), &[], &[])
            .await
            .unwrap();

        let path = [
            (JobState::Queued, "Job validated"),
            (JobState::Waiting, "All input files present"),
            (JobState::Running, "Recipe started"),
            (JobState::Processed, "Recipe finished"),
            (JobState::Transferring, "Output staged for transfer"),
            (JobState::Ingestion, "Transfer confirmed"),
            (JobState::Ingesting, "Archive ingestion started"),
            (JobState::Complete, "Archive ingestion finished"),
        ];

        let mut prev = JobState::Unknown;
        for (next, message) in path {
            change_state(&pool, id, next, message, Some(prev), &actor)
                .await
                .unwrap();
            prev = next;
        }

        let job = get_job(&pool, id).await.unwrap();
        assert_eq!(job.state, JobState::Complete);
        assert_eq!(job.state_prev, JobState::Ingesting);

        // Exactly one audit row per transition, in order, timestamps
        // never going backwards.
        let logs = get_logs(&pool, id).await.unwrap();
        assert_eq!(logs.len(), path.len());
        let mut prev = JobState::Unknown;
        for (entry, (next, message)) in logs.iter().zip(path) {
            assert_eq!(entry.state_prev, prev);
            assert_eq!(entry.state_new, next);
            assert_eq!(entry.message, message);
            prev = next;
        }
        for pair in logs.windows(2) {
            assert!(pair[0].id < pair[1].id);
            assert!(pair[0].logged_at <= pair[1].logged_at);
        }
    }

    #[tokio::test]
    async fn test_reset_semantics() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        let id = create_job(&pool, &sample_job("reset-me", "t1"), &[], &[])
            .await
            .unwrap();
        for (next, prev) in [
            (JobState::Queued, JobState::Unknown),
            (JobState::Waiting, JobState::Queued),
            (JobState::Running, JobState::Waiting),
        ] {
            change_state(&pool, id, next, "advance", Some(prev), &actor)
                .await
                .unwrap();
        }

        // Running is active: reset without force is rejected.
        let err = reset_job(&pool, id, false, &actor).await.unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
        assert_eq!(get_job(&pool, id).await.unwrap().state, JobState::Running);

        // With force the job goes back to Queued with an audit row.
        reset_job(&pool, id, true, &actor).await.unwrap();
        let job = get_job(&pool, id).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.state_prev, JobState::Running);

        let logs = get_logs(&pool, id).await.unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.state_new, JobState::Queued);
        assert!(last.message.contains("Forced reset"));
    }

    #[tokio::test]
    async fn test_find_jobs_fairness_order() {
        let pool = crate::db::memory_pool().await;

        let mut low = sample_job("order-low", "t1");
        low.priority = 0;
        let mut high_a = sample_job("order-high-a", "t1");
        high_a.priority = 10;
        let mut high_b = sample_job("order-high-b", "t1");
        high_b.priority = 10;

        let id_low = create_job(&pool, &low, &[], &[]).await.unwrap();
        let id_high_a = create_job(&pool, &high_a, &[], &[]).await.unwrap();
        let id_high_b = create_job(&pool, &high_b, &[], &[]).await.unwrap();

        let jobs = find_jobs(
            &pool,
            &JobQuery {
                task: Some("t1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![id_high_a, id_high_b, id_low]);
    }

    #[tokio::test]
    async fn test_find_jobs_filters() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        let a = create_job(&pool, &sample_job("filter-a", "t1"), &[], &[])
            .await
            .unwrap();
        let mut remote = sample_job("filter-b", "t1");
        remote.location = "CADC".to_string();
        remote.foreign_id = Some("ri-1".to_string());
        create_job(&pool, &remote, &[], &[]).await.unwrap();

        change_state(&pool, a, JobState::Queued, "queued", Some(JobState::Unknown), &actor)
            .await
            .unwrap();

        let queued = find_jobs(
            &pool,
            &JobQuery {
                state: Some(JobState::Queued),
                location: Some("JAC".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, a);

        let none = find_jobs(
            &pool,
            &JobQuery {
                state: Some(JobState::Queued),
                location: Some("CADC".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(none.is_empty());
    }
}
