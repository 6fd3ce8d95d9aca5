//! Note Repository

use aster_core::domain::note::Note;
use sqlx::SqliteExecutor;

/// Append one operator note.
pub async fn insert<'e, E>(
    executor: E,
    job_id: i64,
    message: &str,
    username: &str,
) -> Result<i64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT INTO note (job_id, noted_at, message, username) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(job_id)
    .bind(chrono::Utc::now())
    .bind(message)
    .bind(username)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// All notes for a job, oldest first.
pub async fn for_job<'e, E>(executor: E, job_id: i64) -> Result<Vec<Note>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(i64, i64, chrono::DateTime<chrono::Utc>, String, String)> = sqlx::query_as(
        "SELECT id, job_id, noted_at, message, username FROM note WHERE job_id = ?1 ORDER BY id ASC",
    )
    .bind(job_id)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, job_id, noted_at, message, username)| Note {
            id,
            job_id,
            noted_at,
            message,
            username,
        })
        .collect())
}
