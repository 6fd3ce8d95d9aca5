//! Parent Relation Repository
//!
//! Parent/child dependencies are stored as an adjacency relation keyed by
//! id pairs; the graph is a DAG, not a tree.

use aster_core::domain::job::ParentLink;
use sqlx::{SqliteConnection, SqliteExecutor};

/// Add one dependency edge.
pub async fn add<'e, E>(
    executor: E,
    job_id: i64,
    parent_id: i64,
    filter: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("INSERT INTO parent (job_id, parent_id, filter) VALUES (?1, ?2, ?3)")
        .bind(job_id)
        .bind(parent_id)
        .bind(filter)
        .execute(executor)
        .await?;

    Ok(())
}

/// Dependency edges of a job, parent id ascending.
pub async fn for_job<'e, E>(executor: E, job_id: i64) -> Result<Vec<ParentLink>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(i64, Option<String>)> = sqlx::query_as(
        "SELECT parent_id, filter FROM parent WHERE job_id = ?1 ORDER BY parent_id ASC",
    )
    .bind(job_id)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(parent_id, filter)| ParentLink {
            job_id,
            parent_id,
            filter,
        })
        .collect())
}

/// Replace the full parent list of a job.
pub async fn replace(
    conn: &mut SqliteConnection,
    job_id: i64,
    parents: &[(i64, Option<String>)],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM parent WHERE job_id = ?1")
        .bind(job_id)
        .execute(&mut *conn)
        .await?;

    for (parent_id, filter) in parents {
        sqlx::query("INSERT INTO parent (job_id, parent_id, filter) VALUES (?1, ?2, ?3)")
            .bind(job_id)
            .bind(parent_id)
            .bind(filter)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}
