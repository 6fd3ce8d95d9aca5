//! Submission command handlers

use anyhow::Result;
use clap::Subcommand;
use sqlx::SqlitePool;

use aster_core::domain::job::ProcessingMode;
use aster_registry::service::submit_service;
use aster_registry::service::submit_service::CoaddSubmission;
use aster_runner::util;

/// Submission subcommands
#[derive(Subcommand)]
pub enum SubmitCommands {
    /// Submit (or update) one co-add job for a tile
    Coadd {
        /// Tile number
        tile: i64,

        /// Task whose outputs are being co-added
        parent_task: String,

        /// Processing mode
        #[arg(long, default_value = "public")]
        mode: String,

        /// Recipe parameters for the co-add
        #[arg(long, default_value = "")]
        parameters: String,

        /// Location the co-add job runs at
        #[arg(long, env = "ASTER_LOCATION", default_value = "JAC")]
        location: String,

        /// Scheduling priority
        #[arg(long, default_value_t = 0)]
        priority: i64,

        /// Override the derived output task name
        #[arg(long)]
        output_task: Option<String>,

        /// Freeze the job once created; refuse later updates
        #[arg(long)]
        never_update: bool,

        /// Report what would happen without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Submit co-add jobs for every tile a task has touched
    CoaddAll {
        /// Task whose outputs are being co-added
        parent_task: String,

        /// Processing mode
        #[arg(long, default_value = "public")]
        mode: String,

        /// Recipe parameters for the co-adds
        #[arg(long, default_value = "")]
        parameters: String,

        /// Location the co-add jobs run at
        #[arg(long, env = "ASTER_LOCATION", default_value = "JAC")]
        location: String,

        /// Scheduling priority
        #[arg(long, default_value_t = 0)]
        priority: i64,

        /// Freeze jobs once created; refuse later updates
        #[arg(long)]
        never_update: bool,

        /// Report what would happen without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

/// Handle submission commands
pub async fn handle_submit_command(command: SubmitCommands, pool: &SqlitePool) -> Result<()> {
    let actor = util::local_actor();

    match command {
        SubmitCommands::Coadd {
            tile,
            parent_task,
            mode,
            parameters,
            location,
            priority,
            output_task,
            never_update,
            dry_run,
        } => {
            let submission = CoaddSubmission {
                tile,
                parent_task,
                mode: mode.parse::<ProcessingMode>()?,
                parameters,
                location,
                priority,
                output_task,
                never_update,
                dry_run,
            };

            match submit_service::submit_coadd_job(pool, &submission, &actor).await? {
                Some(id) => println!("Co-add job for tile {tile}: job {id}"),
                None => println!("Co-add job for tile {tile}: nothing to do"),
            }

            Ok(())
        }
        SubmitCommands::CoaddAll {
            parent_task,
            mode,
            parameters,
            location,
            priority,
            never_update,
            dry_run,
        } => {
            let mode = mode.parse::<ProcessingMode>()?;
            let tiles = submit_service::get_tilelist(pool, &parent_task).await?;

            if tiles.is_empty() {
                println!("Task {parent_task} has no recorded tiles");
                return Ok(());
            }

            for tile in tiles {
                let submission = CoaddSubmission {
                    tile,
                    parent_task: parent_task.clone(),
                    mode,
                    parameters: parameters.clone(),
                    location: location.clone(),
                    priority,
                    output_task: None,
                    never_update,
                    dry_run,
                };

                match submit_service::submit_coadd_job(pool, &submission, &actor).await? {
                    Some(id) => println!("tile {tile}: job {id}"),
                    None => println!("tile {tile}: nothing to do"),
                }
            }

            Ok(())
        }
    }
}
