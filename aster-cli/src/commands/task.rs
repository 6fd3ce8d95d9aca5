//! Task configuration command handlers

use anyhow::Result;
use clap::Subcommand;
use sqlx::SqlitePool;

use aster_core::domain::task::TaskInfo;
use aster_registry::repository::task_repository;
use aster_registry::service::submit_service;

/// Task subcommands
#[derive(Subcommand)]
pub enum TaskCommands {
    /// List all configured tasks
    List,
    /// Show one task's configuration
    Show {
        /// Task name
        taskname: String,
    },
    /// Create or update a task's configuration
    Set {
        /// Task name
        taskname: String,

        /// Enable or disable e-transfer for this task
        #[arg(long)]
        etransfer: Option<bool>,

        /// Custom run command
        #[arg(long)]
        command_run: Option<String>,

        /// Custom transfer command
        #[arg(long)]
        command_xfer: Option<String>,

        /// Custom ingest command
        #[arg(long)]
        command_ingest: Option<String>,

        /// Pinned recipe environment directory
        #[arg(long)]
        starlink_dir: Option<String>,

        /// Task version pin
        #[arg(long)]
        version: Option<i64>,

        /// Retry budget for external calls
        #[arg(long)]
        max_tries: Option<i64>,

        /// Delay between retries, in seconds
        #[arg(long)]
        retry_delay_secs: Option<i64>,
    },
    /// List the tiles a task's jobs have touched
    Tiles {
        /// Task name
        taskname: String,
    },
}

/// Handle task commands
pub async fn handle_task_command(command: TaskCommands, pool: &SqlitePool) -> Result<()> {
    match command {
        TaskCommands::List => {
            for info in task_repository::all(pool).await? {
                let etransfer = match info.etransfer {
                    Some(true) => "yes",
                    Some(false) => "no",
                    None => "undecided",
                };
                println!("{:32}  etransfer: {}", info.taskname, etransfer);
            }

            Ok(())
        }
        TaskCommands::Show { taskname } => {
            let Some(info) = task_repository::get(pool, &taskname).await? else {
                anyhow::bail!("task {taskname:?} is not configured");
            };

            println!("Task {}", info.taskname);
            println!("  etransfer:    {:?}", info.etransfer);
            println!("  command_run:  {:?}", info.command_run);
            println!("  command_xfer: {:?}", info.command_xfer);
            println!("  command_ing:  {:?}", info.command_ingest);
            println!("  starlink_dir: {:?}", info.starlink_dir);
            println!("  version:      {:?}", info.version);
            println!("  max_tries:    {:?}", info.max_tries);
            println!("  retry_delay:  {:?}", info.retry_delay_secs);

            Ok(())
        }
        TaskCommands::Set {
            taskname,
            etransfer,
            command_run,
            command_xfer,
            command_ingest,
            starlink_dir,
            version,
            max_tries,
            retry_delay_secs,
        } => {
            // Start from the existing configuration so unset flags keep
            // their current values.
            let mut info = task_repository::get(pool, &taskname)
                .await?
                .unwrap_or_else(|| TaskInfo::new(&taskname));

            if etransfer.is_some() {
                info.etransfer = etransfer;
            }
            if command_run.is_some() {
                info.command_run = command_run;
            }
            if command_xfer.is_some() {
                info.command_xfer = command_xfer;
            }
            if command_ingest.is_some() {
                info.command_ingest = command_ingest;
            }
            if starlink_dir.is_some() {
                info.starlink_dir = starlink_dir;
            }
            if version.is_some() {
                info.version = version;
            }
            if max_tries.is_some() {
                info.max_tries = max_tries;
            }
            if retry_delay_secs.is_some() {
                info.retry_delay_secs = retry_delay_secs;
            }

            task_repository::upsert(pool, &info).await?;
            println!("Task {taskname} updated");

            Ok(())
        }
        TaskCommands::Tiles { taskname } => {
            let tiles = submit_service::get_tilelist(pool, &taskname).await?;
            for tile in tiles {
                println!("{tile}");
            }

            Ok(())
        }
    }
}
