//! Task Repository
//!
//! Task configuration is read-mostly: looked up by executors on every
//! pass, written only by administrative commands.

use aster_core::domain::task::TaskInfo;
use sqlx::SqliteExecutor;

const TASK_COLUMNS: &str = "taskname, etransfer, command_run, command_xfer, \
     command_ingest, starlink_dir, version, max_tries, retry_delay_secs";

/// Task configuration by name.
pub async fn get<'e, E>(executor: E, taskname: &str) -> Result<Option<TaskInfo>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM task WHERE taskname = ?1"
    ))
    .bind(taskname)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(TaskInfo::from))
}

/// All task configurations, by name.
pub async fn all<'e, E>(executor: E) -> Result<Vec<TaskInfo>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {TASK_COLUMNS} FROM task ORDER BY taskname ASC"
    ))
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(TaskInfo::from).collect())
}

/// Insert or replace a task configuration.
pub async fn upsert<'e, E>(executor: E, info: &TaskInfo) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO task
            (taskname, etransfer, command_run, command_xfer, command_ingest,
             starlink_dir, version, max_tries, retry_delay_secs)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (taskname) DO UPDATE SET
            etransfer = excluded.etransfer,
            command_run = excluded.command_run,
            command_xfer = excluded.command_xfer,
            command_ingest = excluded.command_ingest,
            starlink_dir = excluded.starlink_dir,
            version = excluded.version,
            max_tries = excluded.max_tries,
            retry_delay_secs = excluded.retry_delay_secs
        "#,
    )
    .bind(&info.taskname)
    .bind(info.etransfer)
    .bind(&info.command_run)
    .bind(&info.command_xfer)
    .bind(&info.command_ingest)
    .bind(&info.starlink_dir)
    .bind(info.version)
    .bind(info.max_tries)
    .bind(info.retry_delay_secs)
    .execute(executor)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    taskname: String,
    etransfer: Option<bool>,
    command_run: Option<String>,
    command_xfer: Option<String>,
    command_ingest: Option<String>,
    starlink_dir: Option<String>,
    version: Option<i64>,
    max_tries: Option<i64>,
    retry_delay_secs: Option<i64>,
}

impl From<TaskRow> for TaskInfo {
    fn from(row: TaskRow) -> Self {
        TaskInfo {
            taskname: row.taskname,
            etransfer: row.etransfer,
            command_run: row.command_run,
            command_xfer: row.command_xfer,
            command_ingest: row.command_ingest,
            starlink_dir: row.starlink_dir,
            version: row.version,
            max_tries: row.max_tries,
            retry_delay_secs: row.retry_delay_secs,
        }
    }
}
