//! Pool construction and schema migration

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

/// Open the registry database, creating the file if necessary.
///
/// WAL journaling plus a busy timeout is what lets several independent
/// processes (pollers, one-shot commands) share the same registry file:
/// conflicting writes serialize inside SQLite instead of failing fast.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    SqlitePoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
}

/// Create the registry schema.
///
/// All statements are idempotent so every process can run this at startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task (
            taskname TEXT PRIMARY KEY,
            etransfer INTEGER,
            command_run TEXT,
            command_xfer TEXT,
            command_ingest TEXT,
            starlink_dir TEXT,
            version INTEGER,
            max_tries INTEGER,
            retry_delay_secs INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tag TEXT NOT NULL UNIQUE,
            state TEXT NOT NULL DEFAULT '?',
            state_prev TEXT NOT NULL DEFAULT '?',
            location TEXT NOT NULL,
            foreign_id TEXT,
            mode TEXT NOT NULL,
            parameters TEXT NOT NULL DEFAULT '',
            priority INTEGER NOT NULL DEFAULT 0,
            task TEXT NOT NULL,
            qa_state TEXT NOT NULL DEFAULT '?',
            instrument TEXT,
            added_at TEXT NOT NULL,
            UNIQUE (location, foreign_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            logged_at TEXT NOT NULL,
            state_prev TEXT NOT NULL,
            state_new TEXT NOT NULL,
            message TEXT NOT NULL,
            host TEXT NOT NULL,
            username TEXT NOT NULL,
            FOREIGN KEY (job_id) REFERENCES job (id) ON DELETE RESTRICT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS input_file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            filename TEXT NOT NULL,
            UNIQUE (job_id, filename),
            FOREIGN KEY (job_id) REFERENCES job (id) ON DELETE RESTRICT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS output_file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            filename TEXT NOT NULL,
            checksum TEXT,
            UNIQUE (job_id, filename),
            FOREIGN KEY (job_id) REFERENCES job (id) ON DELETE RESTRICT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parent (
            job_id INTEGER NOT NULL,
            parent_id INTEGER NOT NULL,
            filter TEXT,
            UNIQUE (job_id, parent_id),
            FOREIGN KEY (job_id) REFERENCES job (id) ON DELETE RESTRICT,
            FOREIGN KEY (parent_id) REFERENCES job (id) ON DELETE RESTRICT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qa (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            judged_at TEXT NOT NULL,
            status TEXT NOT NULL,
            message TEXT NOT NULL,
            username TEXT NOT NULL,
            FOREIGN KEY (job_id) REFERENCES job (id) ON DELETE RESTRICT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS note (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            noted_at TEXT NOT NULL,
            message TEXT NOT NULL,
            username TEXT NOT NULL,
            FOREIGN KEY (job_id) REFERENCES job (id) ON DELETE RESTRICT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tile (
            job_id INTEGER NOT NULL,
            tile INTEGER NOT NULL,
            UNIQUE (job_id, tile),
            FOREIGN KEY (job_id) REFERENCES job (id) ON DELETE RESTRICT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_state ON job (state)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_task ON job (task)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_location ON job (location)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_log_job_id ON log (job_id, id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tile_tile ON tile (tile)")
        .execute(pool)
        .await?;

    tracing::debug!("Registry schema is up to date");
    Ok(())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::from_str("sqlite::memory:")
                .unwrap()
                .foreign_keys(true),
        )
        .await
        .expect("open in-memory registry");

    run_migrations(&pool).await.expect("migrate");
    pool
}
