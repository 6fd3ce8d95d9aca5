//! Action command handlers
//!
//! One-shot executor runs for operators and cron jobs: fetch/run/ingest a
//! specific job (or the next eligible one), make a full poll pass, clean
//! working directories, or bulk-reset a selection.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use sqlx::SqlitePool;

use aster_registry::service::job_service;
use aster_runner::config::Config;
use aster_runner::executors::{clean, etransfer, fetch, ingest, reset, run};
use aster_runner::external::archive::{ArchiveClient, HttpArchiveClient};
use aster_runner::external::feed::{RawFeed, SpoolDirFeed};
use aster_runner::external::recipe::{RecipeRunner, WrapperRecipeRunner};
use aster_runner::poller::Poller;
use aster_runner::util;

use super::parse_state;

/// Action subcommands
#[derive(Subcommand)]
pub enum ActionCommands {
    /// Assemble input data for a job (or the next Missing job)
    Fetch {
        /// Job id; omitted means the next eligible job
        id: Option<i64>,

        /// Fetch regardless of the job's current state
        #[arg(long)]
        force: bool,
    },
    /// Run the reduction recipe for a job (or the next Waiting job)
    Run {
        /// Job id; omitted means the next eligible job
        id: Option<i64>,

        /// Run regardless of the job's current state
        #[arg(long)]
        force: bool,
    },
    /// Stage a job's output into the e-transfer directories
    Etransfer {
        /// Job id
        id: i64,

        /// Stage regardless of the job's current state
        #[arg(long)]
        force: bool,
    },
    /// Ingest a job's output into the archive (or the next eligible job)
    Ingest {
        /// Job id; omitted means the next eligible job
        id: Option<i64>,

        /// Ingest regardless of the job's current state
        #[arg(long)]
        force: bool,
    },
    /// Make one full poll pass over all eligible jobs
    Poll,
    /// Reclaim input/scratch directories of finished jobs
    Clean {
        /// Stop after this many jobs
        #[arg(long)]
        limit: Option<usize>,

        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Reset a selection of jobs back to Queued
    ResetJobs {
        /// Restrict to one task
        #[arg(long)]
        task: Option<String>,

        /// Restrict to one state code
        #[arg(long)]
        state: Option<String>,

        /// Restrict to one instrument
        #[arg(long)]
        instrument: Option<String>,

        /// Reset jobs even in active states
        #[arg(long)]
        force: bool,

        /// Report what would be reset without resetting
        #[arg(long)]
        dry_run: bool,
    },
}

/// Handle action commands
pub async fn handle_action_command(command: ActionCommands, pool: &SqlitePool) -> Result<()> {
    let config = load_runner_config()?;
    let actor = util::local_actor();

    let archive: Arc<dyn ArchiveClient> = Arc::new(
        HttpArchiveClient::new(config.archive_url.clone(), config.external_timeout)
            .context("Failed to build archive client")?,
    );
    let wrapper =
        std::env::var("ASTER_RECIPE_WRAPPER").unwrap_or_else(|_| "aster-wrapdr".to_string());
    let recipe: Arc<dyn RecipeRunner> = Arc::new(WrapperRecipeRunner::new(wrapper));

    match command {
        ActionCommands::Fetch { id, force } => {
            match id {
                Some(id) => {
                    let job = job_service::get_job(pool, id).await?;
                    let outcome =
                        fetch::fetch_job(pool, &config, archive.as_ref(), &job, force, &actor)
                            .await?;
                    println!("fetch job {id}: {outcome:?}");
                }
                None => match fetch::fetch_next(pool, &config, archive.as_ref(), &actor).await? {
                    Some((id, outcome)) => println!("fetch job {id}: {outcome:?}"),
                    None => println!("no job waiting for fetch"),
                },
            }

            Ok(())
        }
        ActionCommands::Run { id, force } => {
            match id {
                Some(id) => {
                    let job = job_service::get_job(pool, id).await?;
                    let outcome =
                        run::run_job(pool, &config, recipe.as_ref(), &job, force, &actor).await?;
                    println!("run job {id}: {outcome:?}");
                }
                None => match run::run_next(pool, &config, recipe.as_ref(), &actor).await? {
                    Some((id, outcome)) => println!("run job {id}: {outcome:?}"),
                    None => println!("no job waiting to run"),
                },
            }

            Ok(())
        }
        ActionCommands::Etransfer { id, force } => {
            let job = job_service::get_job(pool, id).await?;
            let outcome =
                etransfer::send_output(pool, &config, archive.as_ref(), &job, force, &actor)
                    .await?;
            println!("e-transfer job {id}: {outcome:?}");

            Ok(())
        }
        ActionCommands::Ingest { id, force } => {
            match id {
                Some(id) => {
                    let job = job_service::get_job(pool, id).await?;
                    let outcome =
                        ingest::ingest_job(pool, &config, archive.as_ref(), &job, force, &actor)
                            .await?;
                    println!("ingest job {id}: {outcome:?}");
                }
                None => match ingest::ingest_next(pool, &config, archive.as_ref(), &actor).await? {
                    Some((id, outcome)) => println!("ingest job {id}: {outcome:?}"),
                    None => println!("no job waiting for ingestion"),
                },
            }

            Ok(())
        }
        ActionCommands::Poll => {
            let feed = config
                .raw_spool_dir
                .as_ref()
                .map(|dir| Arc::new(SpoolDirFeed::new(dir)) as Arc<dyn RawFeed>);

            let poller = Poller::new(pool.clone(), config, archive, recipe, feed);

            if poller.poll_once().await? {
                println!("poll pass finished without errors");
                Ok(())
            } else {
                anyhow::bail!("poll pass finished with job errors");
            }
        }
        ActionCommands::Clean { limit, dry_run } => {
            let cleaned = clean::clean_job_dirs(pool, &config, limit, dry_run).await?;
            println!("reclaimed directories for {cleaned} jobs");

            Ok(())
        }
        ActionCommands::ResetJobs {
            task,
            state,
            instrument,
            force,
            dry_run,
        } => {
            let selection = reset::ResetSelection {
                task,
                state: state.as_deref().map(parse_state).transpose()?,
                instrument,
                ..Default::default()
            };

            let n = reset::reset_jobs(pool, &config, &selection, force, dry_run, &actor).await?;
            println!("reset {n} jobs");

            Ok(())
        }
    }
}

fn load_runner_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => Err(e).context(
            "runner configuration missing; set ASTER_LOCATION and ASTER_BASE_DIR",
        ),
    }
}
