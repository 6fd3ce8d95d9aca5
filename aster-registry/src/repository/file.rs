//! Input/Output File Repository
//!
//! Files are owned exclusively by their job (restrict-on-delete in the
//! schema). Output lists are replaced wholesale when a run completes, so
//! re-running a job never accumulates stale entries.

use aster_core::domain::job::OutputFile;
use sqlx::{SqliteConnection, SqliteExecutor};

/// Record one input filename for a job.
pub async fn add_input<'e, E>(executor: E, job_id: i64, filename: &str) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("INSERT INTO input_file (job_id, filename) VALUES (?1, ?2)")
        .bind(job_id)
        .bind(filename)
        .execute(executor)
        .await?;

    Ok(())
}

/// Input filenames for a job, in insertion order.
pub async fn inputs<'e, E>(executor: E, job_id: i64) -> Result<Vec<String>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT filename FROM input_file WHERE job_id = ?1 ORDER BY id ASC")
            .bind(job_id)
            .fetch_all(executor)
            .await?;

    Ok(rows.into_iter().map(|(f,)| f).collect())
}

/// Record one output file for a job.
pub async fn add_output<'e, E>(
    executor: E,
    job_id: i64,
    filename: &str,
    checksum: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("INSERT INTO output_file (job_id, filename, checksum) VALUES (?1, ?2, ?3)")
        .bind(job_id)
        .bind(filename)
        .bind(checksum)
        .execute(executor)
        .await?;

    Ok(())
}

/// Replace the recorded output file list for a job.
pub async fn set_outputs(
    conn: &mut SqliteConnection,
    job_id: i64,
    files: &[(String, Option<String>)],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM output_file WHERE job_id = ?1")
        .bind(job_id)
        .execute(&mut *conn)
        .await?;

    for (filename, checksum) in files {
        sqlx::query("INSERT INTO output_file (job_id, filename, checksum) VALUES (?1, ?2, ?3)")
            .bind(job_id)
            .bind(filename)
            .bind(checksum)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Output files recorded for a job.
pub async fn outputs<'e, E>(executor: E, job_id: i64) -> Result<Vec<OutputFile>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT filename, checksum FROM output_file WHERE job_id = ?1 ORDER BY id ASC",
    )
    .bind(job_id)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(filename, checksum)| OutputFile {
            job_id,
            filename,
            checksum,
        })
        .collect())
}
