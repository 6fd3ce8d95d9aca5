//! QA Service
//!
//! Appends quality judgments and keeps the cached `qa_state` on the job
//! row in step with the latest entry. This is the only path that changes
//! a job's QA state; the pipeline state machine never touches it.

use aster_core::domain::note::Note;
use aster_core::domain::qa::{QaEntry, QaState};
use sqlx::SqlitePool;

use crate::error::{RegistryError, Result};
use crate::repository::{job_repository, note_repository, qa_repository};

/// Append a QA judgment and refresh the job's cached summary, atomically.
pub async fn add_qa(
    pool: &SqlitePool,
    job_id: i64,
    status: QaState,
    message: &str,
    username: &str,
) -> Result<i64> {
    let mut tx = pool.begin().await?;

    if job_repository::current_state(&mut *tx, job_id).await?.is_none() {
        return Err(RegistryError::NotFound(format!("id {job_id}")));
    }

    let entry_id = qa_repository::insert(&mut *tx, job_id, status, message, username).await?;
    job_repository::set_qa_state(&mut *tx, job_id, status).await?;

    tx.commit().await?;

    tracing::info!("Job {} QA set to {} by {}", job_id, status, username);

    Ok(entry_id)
}

/// All QA judgments for a job, oldest first.
pub async fn get_qa_entries(pool: &SqlitePool, job_id: i64) -> Result<Vec<QaEntry>> {
    qa_repository::for_job(pool, job_id).await
}

/// Append an operator note.
pub async fn add_note(
    pool: &SqlitePool,
    job_id: i64,
    message: &str,
    username: &str,
) -> Result<i64> {
    if job_repository::find_by_id(pool, job_id).await?.is_none() {
        return Err(RegistryError::NotFound(format!("id {job_id}")));
    }

    Ok(note_repository::insert(pool, job_id, message, username).await?)
}

/// All notes for a job, oldest first.
pub async fn get_notes(pool: &SqlitePool, job_id: i64) -> Result<Vec<Note>> {
    Ok(note_repository::for_job(pool, job_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::job::JobQuery;
    use crate::service::job::tests::{sample_job, test_actor};
    use crate::service::job_service;
    use aster_core::domain::state::JobState;

    #[tokio::test]
    async fn test_qa_updates_cached_state() {
        let pool = crate::db::memory_pool().await;

        let id = job_service::create_job(&pool, &sample_job("qa-1", "t1"), &[], &[])
            .await
            .unwrap();

        assert_eq!(
            job_service::get_job(&pool, id).await.unwrap().qa_state,
            QaState::Unknown
        );

        add_qa(&pool, id, QaState::Questionable, "noisy map", "alice")
            .await
            .unwrap();
        add_qa(&pool, id, QaState::Good, "re-checked, fine", "bob")
            .await
            .unwrap();

        let job = job_service::get_job(&pool, id).await.unwrap();
        assert_eq!(job.qa_state, QaState::Good);

        let entries = get_qa_entries(&pool, id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, QaState::Questionable);
        assert_eq!(entries[1].status, QaState::Good);
        assert_eq!(entries[1].username, "bob");

        // The latest entry and the cached summary agree.
        let latest = qa_repository::latest(&pool, id).await.unwrap().unwrap();
        assert_eq!(latest.status, job.qa_state);
    }

    #[tokio::test]
    async fn test_qa_filter_matches_latest_entry() {
        let pool = crate::db::memory_pool().await;

        let good = job_service::create_job(&pool, &sample_job("qa-good", "t1"), &[], &[])
            .await
            .unwrap();
        let demoted = job_service::create_job(&pool, &sample_job("qa-demoted", "t1"), &[], &[])
            .await
            .unwrap();

        add_qa(&pool, good, QaState::Good, "clean", "alice").await.unwrap();
        add_qa(&pool, demoted, QaState::Good, "looked ok", "alice")
            .await
            .unwrap();
        add_qa(&pool, demoted, QaState::Bad, "bad baseline", "bob")
            .await
            .unwrap();

        let jobs = job_service::find_jobs(
            &pool,
            &JobQuery {
                qa_state: Some(QaState::Good),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, good);
    }

    #[tokio::test]
    async fn test_pipeline_transitions_leave_qa_alone() {
        let pool = crate::db::memory_pool().await;
        let actor = test_actor();

        let id = job_service::create_job(&pool, &sample_job("qa-static", "t1"), &[], &[])
            .await
            .unwrap();
        add_qa(&pool, id, QaState::Questionable, "fringe artefact", "alice")
            .await
            .unwrap();

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
        job_service::reset_job(&pool, id, false, &actor).await.unwrap();

        assert_eq!(
            job_service::get_job(&pool, id).await.unwrap().qa_state,
            QaState::Questionable
        );
    }

    #[tokio::test]
    async fn test_note_append() {
        let pool = crate::db::memory_pool().await;

        let id = job_service::create_job(&pool, &sample_job("note-1", "t1"), &[], &[])
            .await
            .unwrap();

        add_note(&pool, id, "held back for the observer's report", "carol")
            .await
            .unwrap();

        let notes = get_notes(&pool, id).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].username, "carol");

        assert!(matches!(
            add_note(&pool, id + 99, "ghost", "carol").await,
            Err(RegistryError::NotFound(_))
        ));
    }
}
