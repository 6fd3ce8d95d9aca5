//! Job Repository
//!
//! Handles all database operations on the job table. State changes go
//! through the conditioned/forced update pair; the service layer wraps
//! them in a transaction together with the audit log insert.

use aster_core::domain::job::{Job, ProcessingMode};
use aster_core::domain::qa::QaState;
use aster_core::domain::state::JobState;
use sqlx::SqliteExecutor;

use crate::error::RegistryError;

const JOB_COLUMNS: &str = "id, tag, state, state_prev, location, foreign_id, \
     mode, parameters, priority, task, qa_state, instrument, added_at";

/// Fields required to insert a new job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub tag: String,
    pub location: String,
    pub foreign_id: Option<String>,
    pub mode: ProcessingMode,
    pub parameters: String,
    pub priority: i64,
    pub task: String,
    pub instrument: Option<String>,
}

/// Filter for `find`. Unset fields do not constrain the result.
///
/// Results are always ordered `priority DESC, id ASC`; this ordering is the
/// scheduling fairness contract relied on by every executor.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub task: Option<String>,
    pub state: Option<JobState>,
    pub location: Option<String>,
    pub qa_state: Option<QaState>,
    pub instrument: Option<String>,
    pub added_after: Option<chrono::DateTime<chrono::Utc>>,
    pub added_before: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<i64>,
}

/// Insert a new job row in the initial Unknown state, returning its id.
pub async fn create<'e, E>(executor: E, new: &NewJob) -> Result<i64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let now = chrono::Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO job
            (tag, state, state_prev, location, foreign_id, mode, parameters,
             priority, task, qa_state, instrument, added_at)
        VALUES (?1, '?', '?', ?2, ?3, ?4, ?5, ?6, ?7, '?', ?8, ?9)
        "#,
    )
    .bind(&new.tag)
    .bind(&new.location)
    .bind(&new.foreign_id)
    .bind(new.mode.as_str())
    .bind(&new.parameters)
    .bind(new.priority)
    .bind(&new.task)
    .bind(&new.instrument)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Find a job by id.
pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Job>, RegistryError>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM job WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(Job::try_from).transpose()
}

/// Find a job by its unique tag.
pub async fn find_by_tag<'e, E>(executor: E, tag: &str) -> Result<Option<Job>, RegistryError>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, JobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM job WHERE tag = ?1"
    ))
    .bind(tag)
    .fetch_optional(executor)
    .await?;

    row.map(Job::try_from).transpose()
}

/// Read just the current state of a job.
pub async fn current_state<'e, E>(
    executor: E,
    id: i64,
) -> Result<Option<JobState>, RegistryError>
where
    E: SqliteExecutor<'e>,
{
    let code: Option<(String,)> = sqlx::query_as("SELECT state FROM job WHERE id = ?1")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(match code {
        Some((code,)) => Some(JobState::from_code(&code)?),
        None => None,
    })
}

/// Conditioned state update: writes `state` and rotates `state_prev` only
/// when the row's current state equals `expected`. Returns whether a row
/// was changed. A `false` return with the job present is an
/// optimistic-lock conflict.
pub async fn update_state_checked<'e, E>(
    executor: E,
    id: i64,
    new_state: JobState,
    expected: JobState,
) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE job SET state_prev = state, state = ?1 WHERE id = ?2 AND state = ?3",
    )
    .bind(new_state.code())
    .bind(id)
    .bind(expected.code())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Unconditioned state update for forced operator actions. Returns whether
/// the job row exists.
pub async fn update_state_forced<'e, E>(
    executor: E,
    id: i64,
    new_state: JobState,
) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("UPDATE job SET state_prev = state, state = ?1 WHERE id = ?2")
        .bind(new_state.code())
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Refresh the cached QA summary on the job row.
pub async fn set_qa_state<'e, E>(
    executor: E,
    id: i64,
    qa_state: QaState,
) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("UPDATE job SET qa_state = ?1 WHERE id = ?2")
        .bind(qa_state.code())
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Record the remote system's identifier for this job.
pub async fn set_foreign_id<'e, E>(
    executor: E,
    id: i64,
    foreign_id: &str,
) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("UPDATE job SET foreign_id = ?1 WHERE id = ?2")
        .bind(foreign_id)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Find jobs matching the query, in scheduling fairness order.
pub async fn find<'e, E>(executor: E, query: &JobQuery) -> Result<Vec<Job>, RegistryError>
where
    E: SqliteExecutor<'e>,
{
    let mut builder =
        sqlx::QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM job WHERE 1 = 1"));

    if let Some(task) = &query.task {
        builder.push(" AND task = ").push_bind(task);
    }
    if let Some(state) = query.state {
        builder.push(" AND state = ").push_bind(state.code());
    }
    if let Some(location) = &query.location {
        builder.push(" AND location = ").push_bind(location);
    }
    if let Some(qa_state) = query.qa_state {
        builder.push(" AND qa_state = ").push_bind(qa_state.code());
    }
    if let Some(instrument) = &query.instrument {
        builder.push(" AND instrument = ").push_bind(instrument);
    }
    if let Some(after) = query.added_after {
        builder.push(" AND added_at >= ").push_bind(after);
    }
    if let Some(before) = query.added_before {
        builder.push(" AND added_at <= ").push_bind(before);
    }

    builder.push(" ORDER BY priority DESC, id ASC");

    if let Some(limit) = query.limit {
        builder.push(" LIMIT ").push_bind(limit);
    }

    let rows: Vec<JobRow> = builder.build_query_as().fetch_all(executor).await?;

    rows.into_iter().map(Job::try_from).collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    tag: String,
    state: String,
    state_prev: String,
    location: String,
    foreign_id: Option<String>,
    mode: String,
    parameters: String,
    priority: i64,
    task: String,
    qa_state: String,
    instrument: Option<String>,
    added_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = RegistryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            tag: row.tag,
            state: JobState::from_code(&row.state)?,
            state_prev: JobState::from_code(&row.state_prev)?,
            location: row.location,
            foreign_id: row.foreign_id,
            mode: ProcessingMode::from_str_mode(&row.mode)?,
            parameters: row.parameters,
            priority: row.priority,
            task: row.task,
            qa_state: QaState::from_code(&row.qa_state)?,
            instrument: row.instrument,
            added_at: row.added_at,
        })
    }
}
