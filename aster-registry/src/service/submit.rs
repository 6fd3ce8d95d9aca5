//! Submission Service
//!
//! Co-add submission and the general add/update/delete upsert behind it.
//! Submission is idempotent by construction: re-submitting a job whose
//! inputs are unchanged reports the existing job id and writes nothing.

use std::collections::BTreeSet;
use std::collections::HashSet;

use aster_core::domain::job::ProcessingMode;
use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use sqlx::SqlitePool;

use crate::error::{RegistryError, Result};
use crate::repository::job::NewJob;
use crate::repository::{job_repository, parent_repository, tile_repository};
use crate::service::job::apply_state_change;

/// One co-add submission request: combine all usable outputs of
/// `parent_task` on `tile` into a single co-added product.
#[derive(Debug, Clone)]
pub struct CoaddSubmission {
    pub tile: i64,
    pub parent_task: String,
    pub mode: ProcessingMode,
    pub parameters: String,
    pub location: String,
    pub priority: i64,
    /// Override for the derived `<parent_task>-coadd` task name.
    pub output_task: Option<String>,
    /// Freeze the job once created: updates and deletion are refused, and
    /// an unchanged re-submission is a pure no-op.
    pub never_update: bool,
    pub dry_run: bool,
}

/// Inputs to the general submission upsert.
#[derive(Debug, Clone)]
pub struct JobUpsert {
    pub tag: String,
    pub location: String,
    pub mode: ProcessingMode,
    pub parameters: String,
    pub task: String,
    pub priority: i64,
    pub parents: Vec<(i64, Option<String>)>,
    pub tilelist: Vec<i64>,
    pub allow_add: bool,
    pub allow_upd: bool,
    pub allow_del: bool,
    pub dry_run: bool,
    pub description: String,
}

/// Submit a single co-add job for one tile.
///
/// Parent jobs are discovered through the tile table, excluding jobs whose
/// QA judgment bars them from co-adds and jobs in deleted/won't-work
/// states. Returns the job id, or `None` when there was nothing to do.
pub async fn submit_coadd_job(
    pool: &SqlitePool,
    sub: &CoaddSubmission,
    actor: &Actor,
) -> Result<Option<i64>> {
    let task = sub
        .output_task
        .clone()
        .unwrap_or_else(|| coadd_task_name(&sub.parent_task));
    let tag = coadd_tag(&task, sub.tile);
    let filter = coadd_output_filter(&sub.parent_task, sub.tile)?;

    let parents = tile_repository::coadd_parents_for_tile(pool, &sub.parent_task, sub.tile).await?;

    let upsert = JobUpsert {
        tag,
        location: sub.location.clone(),
        mode: sub.mode,
        parameters: sub.parameters.clone(),
        task,
        priority: sub.priority,
        parents: parents
            .into_iter()
            .map(|id| (id, Some(filter.clone())))
            .collect(),
        tilelist: vec![sub.tile],
        allow_add: true,
        allow_upd: !sub.never_update,
        allow_del: !sub.never_update,
        dry_run: sub.dry_run,
        description: format!("coadd for tile {} of {}", sub.tile, sub.parent_task),
    };

    add_upd_del_job(pool, &upsert, actor).await
}

/// Add a job if absent, update it if its parent inputs changed, or mark it
/// Deleted if no parents remain.
///
/// An unchanged re-submission returns the existing job id without touching
/// the registry. When the relevant arm is disabled (`allow_upd`/
/// `allow_del` off under `never_update`) the operation fails instead of
/// silently altering a frozen job.
pub async fn add_upd_del_job(
    pool: &SqlitePool,
    req: &JobUpsert,
    actor: &Actor,
) -> Result<Option<i64>> {
    let existing = job_repository::find_by_tag(pool, &req.tag).await?;

    let Some(old) = existing else {
        if req.parents.is_empty() {
            tracing::debug!("{} has no usable inputs; nothing submitted", req.description);
            return Ok(None);
        }
        if !req.allow_add {
            return Err(RegistryError::Validation(format!(
                "{} does not exist and adding is disabled",
                req.description
            )));
        }
        if req.dry_run {
            tracing::info!("DRY RUN: {} would be created", req.description);
            return Ok(None);
        }

        let mut tx = pool.begin().await?;
        let job_id = job_repository::create(
            &mut *tx,
            &NewJob {
                tag: req.tag.clone(),
                location: req.location.clone(),
                foreign_id: None,
                mode: req.mode,
                parameters: req.parameters.clone(),
                priority: req.priority,
                task: req.task.clone(),
                instrument: None,
            },
        )
        .await?;
        for (parent_id, filter) in &req.parents {
            parent_repository::add(&mut *tx, job_id, *parent_id, filter.as_deref()).await?;
        }
        tile_repository::set_for_job(&mut tx, job_id, &req.tilelist).await?;
        tx.commit().await?;

        tracing::info!("{} created as job {}", req.description, job_id);
        return Ok(Some(job_id));
    };

    let old_parents: HashSet<(i64, Option<String>)> = parent_repository::for_job(pool, old.id)
        .await?
        .into_iter()
        .map(|link| (link.parent_id, link.filter))
        .collect();
    let new_parents: HashSet<(i64, Option<String>)> = req.parents.iter().cloned().collect();

    if req.parents.is_empty() {
        if old.state == JobState::Deleted {
            return Ok(Some(old.id));
        }
        if !req.allow_del {
            return Err(RegistryError::Validation(format!(
                "{} already exists as job {} and deleting is disabled",
                req.description, old.id
            )));
        }
        if req.dry_run {
            tracing::info!(
                "DRY RUN: job {} ({}) would be marked Deleted",
                old.id,
                req.description
            );
            return Ok(Some(old.id));
        }

        let mut tx = pool.begin().await?;
        apply_state_change(
            &mut tx,
            old.id,
            JobState::Deleted,
            "No usable parent jobs remain; marking job as Deleted",
            None,
            actor,
        )
        .await?;
        tx.commit().await?;

        tracing::info!("Job {} ({}) marked Deleted", old.id, req.description);
        return Ok(Some(old.id));
    }

    if old_parents == new_parents {
        tracing::debug!(
            "{} is unchanged in job {}; nothing to do",
            req.description,
            old.id
        );
        return Ok(Some(old.id));
    }

    if !req.allow_upd {
        return Err(RegistryError::Validation(format!(
            "{} already exists as job {} and updating is disabled",
            req.description, old.id
        )));
    }
    if req.dry_run {
        tracing::info!(
            "DRY RUN: job {} ({}) would be updated and reset",
            old.id,
            req.description
        );
        return Ok(Some(old.id));
    }

    let mut tx = pool.begin().await?;
    parent_repository::replace(&mut tx, old.id, &req.parents).await?;
    tile_repository::set_for_job(&mut tx, old.id, &req.tilelist).await?;
    apply_state_change(
        &mut tx,
        old.id,
        JobState::Unknown,
        "Parent job list updated; job requires re-validation",
        None,
        actor,
    )
    .await?;
    tx.commit().await?;

    tracing::info!("Job {} ({}) updated and reset", old.id, req.description);
    Ok(Some(old.id))
}

/// Tiles touched by any job of a task.
pub async fn get_tilelist(pool: &SqlitePool, task: &str) -> Result<BTreeSet<i64>> {
    Ok(tile_repository::tiles_for_task(pool, task).await?)
}

/// Task name for co-adds derived from the task being co-added.
pub fn coadd_task_name(parent_task: &str) -> String {
    format!("{parent_task}-coadd")
}

/// Unique tag for a co-add job: task plus zero-padded tile number.
pub fn coadd_tag(task: &str, tile: i64) -> String {
    format!("{task}-{tile:06}")
}

/// Filename filter selecting the parent output files for one tile.
///
/// Parent task names carry the subsystem as their third dash-separated
/// component (e.g. `hpx-s2-850-r1`), which appears verbatim in output
/// filenames.
pub fn coadd_output_filter(parent_task: &str, tile: i64) -> Result<String> {
    let subsys = parent_task.split('-').nth(2).ok_or_else(|| {
        RegistryError::Validation(format!(
            "cannot derive subsystem from task name {parent_task:?}"
        ))
    })?;

    Ok(format!(
        r"^[a-z0-9]+_[0-9]{{8}}_[0-9]{{5}}_{subsys}_healpix{tile:06}_obs_[0-9]{{3}}\.fits$"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::log_repository;
    use crate::service::job::tests::{sample_job, test_actor};
    use crate::service::{job_service, qa_service};
    use aster_core::domain::qa::QaState;

    async fn observation_job(pool: &SqlitePool, tag: &str, task: &str, tile: i64) -> i64 {
        let id = job_service::create_job(pool, &sample_job(tag, task), &[], &[])
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        tile_repository::set_for_job(&mut conn, id, &[tile]).await.unwrap();
        id
    }

    fn submission(tile: i64, never_update: bool) -> CoaddSubmission {
        CoaddSubmission {
            tile,
            parent_task: "hpx-s2-850-r1".to_string(),
            mode: ProcessingMode::Public,
            parameters: "-recpars coadd".to_string(),
            location: "JAC".to_string(),
            priority: 0,
            output_task: None,
            never_update,
            dry_run: false,
        }
    }

    #[test]
    fn test_naming_helpers() {
        assert_eq!(coadd_task_name("hpx-s2-850-r1"), "hpx-s2-850-r1-coadd");
        assert_eq!(coadd_tag("hpx-s2-850-r1-coadd", 42), "hpx-s2-850-r1-coadd-000042");
        let filter = coadd_output_filter("hpx-s2-850-r1", 42).unwrap();
        assert!(filter.contains("850"));
        assert!(filter.contains("healpix000042"));
        assert!(coadd_output_filter("plain", 1).is_err());
    }

    #[tokio::test]
    async fn test_coadd_create_then_noop() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        let p1 = observation_job(&pool, "obs-1", "hpx-s2-850-r1", 42).await;
        let p2 = observation_job(&pool, "obs-2", "hpx-s2-850-r1", 42).await;

        let id = submit_coadd_job(&pool, &submission(42, true), &actor)
            .await
            .unwrap()
            .expect("job created");

        let job = job_service::get_job(&pool, id).await.unwrap();
        assert_eq!(job.task, "hpx-s2-850-r1-coadd");
        assert_eq!(job.state, JobState::Unknown);

        let parents: Vec<i64> = parent_repository::for_job(&pool, id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.parent_id)
            .collect();
        assert_eq!(parents, vec![p1, p2]);

        let log_count = log_repository::for_job(&pool, id).await.unwrap().len();

        // Identical re-submission under never_update: same id, no new
        // audit rows, parameters untouched.
        let again = submit_coadd_job(&pool, &submission(42, true), &actor)
            .await
            .unwrap();
        assert_eq!(again, Some(id));
        assert_eq!(
            log_repository::for_job(&pool, id).await.unwrap().len(),
            log_count
        );
        assert_eq!(
            job_service::get_job(&pool, id).await.unwrap().parameters,
            "-recpars coadd"
        );
    }

    #[tokio::test]
    async fn test_coadd_update_resets_job() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        observation_job(&pool, "obs-1", "hpx-s2-850-r1", 7).await;
        let id = submit_coadd_job(&pool, &submission(7, false), &actor)
            .await
            .unwrap()
            .unwrap();

        // Drive the coadd forward a little, then grow the parent set.
        job_service::change_state(
            &pool,
            id,
            JobState::Queued,
            "Job validated",
            Some(JobState::Unknown),
            &actor,
        )
        .await
        .unwrap();

        let p_new = observation_job(&pool, "obs-2", "hpx-s2-850-r1", 7).await;

        let again = submit_coadd_job(&pool, &submission(7, false), &actor)
            .await
            .unwrap();
        assert_eq!(again, Some(id));

        let job = job_service::get_job(&pool, id).await.unwrap();
        assert_eq!(job.state, JobState::Unknown);
        assert_eq!(job.state_prev, JobState::Queued);

        let parents: Vec<i64> = parent_repository::for_job(&pool, id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.parent_id)
            .collect();
        assert!(parents.contains(&p_new));

        // Under never_update the same change is refused.
        observation_job(&pool, "obs-3", "hpx-s2-850-r1", 7).await;
        let err = submit_coadd_job(&pool, &submission(7, true), &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_coadd_delete_when_parents_rejected() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        let p1 = observation_job(&pool, "obs-1", "hpx-s2-850-r1", 9).await;
        let id = submit_coadd_job(&pool, &submission(9, false), &actor)
            .await
            .unwrap()
            .unwrap();

        // QA-reject the only parent: the re-submission finds no usable
        // inputs and marks the coadd Deleted.
        qa_service::add_qa(&pool, p1, QaState::Junk, "corrupted bolometer", "alice")
            .await
            .unwrap();

        let again = submit_coadd_job(&pool, &submission(9, false), &actor)
            .await
            .unwrap();
        assert_eq!(again, Some(id));
        assert_eq!(
            job_service::get_job(&pool, id).await.unwrap().state,
            JobState::Deleted
        );

        // Re-submitting once deleted stays a no-op.
        let log_count = log_repository::for_job(&pool, id).await.unwrap().len();
        submit_coadd_job(&pool, &submission(9, false), &actor)
            .await
            .unwrap();
        assert_eq!(
            log_repository::for_job(&pool, id).await.unwrap().len(),
            log_count
        );
    }

    #[tokio::test]
    async fn test_no_parents_no_job() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        // Tile with no observations: nothing is created.
        let result = submit_coadd_job(&pool, &submission(1234, false), &actor)
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_get_tilelist() {
        let pool = crate::db::memory_pool().await;

        observation_job(&pool, "obs-1", "hpx-s2-850-r1", 3).await;
        observation_job(&pool, "obs-2", "hpx-s2-850-r1", 11).await;
        observation_job(&pool, "obs-3", "hpx-s2-850-r1", 3).await;

        let tiles = get_tilelist(&pool, "hpx-s2-850-r1").await.unwrap();
        assert_eq!(tiles.into_iter().collect::<Vec<_>>(), vec![3, 11]);
    }
}
