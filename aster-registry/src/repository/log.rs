//! Audit Log Repository
//!
//! The log table is append-only: there are deliberately no update or
//! delete operations here.

use aster_core::domain::log::{Actor, LogEntry};
use aster_core::domain::state::JobState;
use sqlx::SqliteExecutor;

use crate::error::RegistryError;

/// Append one audit row. Called in the same transaction as the state
/// change it records.
pub async fn insert<'e, E>(
    executor: E,
    job_id: i64,
    state_prev: JobState,
    state_new: JobState,
    message: &str,
    actor: &Actor,
) -> Result<i64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO log (job_id, logged_at, state_prev, state_new, message, host, username)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(job_id)
    .bind(chrono::Utc::now())
    .bind(state_prev.code())
    .bind(state_new.code())
    .bind(message)
    .bind(&actor.host)
    .bind(&actor.username)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// All audit rows for a job, oldest first.
pub async fn for_job<'e, E>(executor: E, job_id: i64) -> Result<Vec<LogEntry>, RegistryError>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT id, job_id, logged_at, state_prev, state_new, message, host, username
        FROM log
        WHERE job_id = ?1
        ORDER BY id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(LogEntry::try_from).collect()
}

/// Number of times a job has entered the given state.
///
/// Used for bounded-retry accounting: the audit trail is the durable
/// record of how often a stage has been attempted.
pub async fn count_entries_into<'e, E>(
    executor: E,
    job_id: i64,
    state: JobState,
) -> Result<i64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM log WHERE job_id = ?1 AND state_new = ?2")
            .bind(job_id)
            .bind(state.code())
            .fetch_one(executor)
            .await?;

    Ok(count)
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    job_id: i64,
    logged_at: chrono::DateTime<chrono::Utc>,
    state_prev: String,
    state_new: String,
    message: String,
    host: String,
    username: String,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = RegistryError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(LogEntry {
            id: row.id,
            job_id: row.job_id,
            logged_at: row.logged_at,
            state_prev: JobState::from_code(&row.state_prev)?,
            state_new: JobState::from_code(&row.state_new)?,
            message: row.message,
            host: row.host,
            username: row.username,
        })
    }
}
