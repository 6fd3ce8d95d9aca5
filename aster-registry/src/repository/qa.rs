//! QA Repository
//!
//! QA judgments are append-only; the latest entry determines the cached
//! `qa_state` on the job row.

use aster_core::domain::qa::{QaEntry, QaState};
use sqlx::SqliteExecutor;

use crate::error::RegistryError;

/// Append one QA judgment.
pub async fn insert<'e, E>(
    executor: E,
    job_id: i64,
    status: QaState,
    message: &str,
    username: &str,
) -> Result<i64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "INSERT INTO qa (job_id, judged_at, status, message, username) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(job_id)
    .bind(chrono::Utc::now())
    .bind(status.code())
    .bind(message)
    .bind(username)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// All QA judgments for a job, oldest first.
pub async fn for_job<'e, E>(executor: E, job_id: i64) -> Result<Vec<QaEntry>, RegistryError>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, QaRow>(
        r#"
        SELECT id, job_id, judged_at, status, message, username
        FROM qa
        WHERE job_id = ?1
        ORDER BY id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(QaEntry::try_from).collect()
}

/// The most recent QA judgment for a job, if any.
pub async fn latest<'e, E>(executor: E, job_id: i64) -> Result<Option<QaEntry>, RegistryError>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, QaRow>(
        r#"
        SELECT id, job_id, judged_at, status, message, username
        FROM qa
        WHERE job_id = ?1
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(job_id)
    .fetch_optional(executor)
    .await?;

    row.map(QaEntry::try_from).transpose()
}

#[derive(sqlx::FromRow)]
struct QaRow {
    id: i64,
    job_id: i64,
    judged_at: chrono::DateTime<chrono::Utc>,
    status: String,
    message: String,
    username: String,
}

impl TryFrom<QaRow> for QaEntry {
    type Error = RegistryError;

    fn try_from(row: QaRow) -> Result<Self, Self::Error> {
        Ok(QaEntry {
            id: row.id,
            job_id: row.job_id,
            judged_at: row.judged_at,
            status: QaState::from_code(&row.status)?,
            message: row.message,
            username: row.username,
        })
    }
}
