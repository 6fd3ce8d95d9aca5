//! Tile Repository
//!
//! Tiles are the spatial partition identifiers of co-added products. A
//! job records which tiles its output touched; co-add submission asks the
//! reverse question.

use std::collections::BTreeSet;

use sqlx::{SqliteConnection, SqliteExecutor};

/// Replace the tile list recorded for a job.
pub async fn set_for_job(
    conn: &mut SqliteConnection,
    job_id: i64,
    tiles: &[i64],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM tile WHERE job_id = ?1")
        .bind(job_id)
        .execute(&mut *conn)
        .await?;

    for tile in tiles {
        sqlx::query("INSERT INTO tile (job_id, tile) VALUES (?1, ?2)")
            .bind(job_id)
            .bind(tile)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// All tiles touched by any job of a task.
pub async fn tiles_for_task<'e, E>(executor: E, task: &str) -> Result<BTreeSet<i64>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT t.tile
        FROM tile t
        JOIN job j ON j.id = t.job_id
        WHERE j.task = ?1
        "#,
    )
    .bind(task)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(t,)| t).collect())
}

/// Jobs of a task whose output touches a tile and whose output is usable
/// as co-add input: deleted/won't-work jobs and QA-rejected jobs are
/// excluded.
pub async fn coadd_parents_for_tile<'e, E>(
    executor: E,
    task: &str,
    tile: i64,
) -> Result<Vec<i64>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT j.id
        FROM job j
        JOIN tile t ON t.job_id = j.id
        WHERE j.task = ?1
          AND t.tile = ?2
          AND j.state NOT IN ('D', 'Z')
          AND j.qa_state NOT IN ('B', 'J')
        ORDER BY j.id ASC
        "#,
    )
    .bind(task)
    .bind(tile)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
