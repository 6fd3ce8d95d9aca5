//! Job command handlers
//!
//! Listing, inspection of the audit trail, and operator reset.

use anyhow::Result;
use clap::Subcommand;
use sqlx::SqlitePool;

use aster_registry::repository::job::JobQuery;
use aster_registry::service::job_service;
use aster_runner::util;

use super::parse_state;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs matching the given filters
    List {
        /// Restrict to one task
        #[arg(long)]
        task: Option<String>,

        /// Restrict to one state code (e.g. Q, E)
        #[arg(long)]
        state: Option<String>,

        /// Restrict to one location
        #[arg(long)]
        location: Option<String>,

        /// Restrict to one QA state code (e.g. G, B)
        #[arg(long)]
        qa_state: Option<String>,

        /// Restrict to one instrument
        #[arg(long)]
        instrument: Option<String>,

        /// Maximum number of jobs to show
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one job in full
    Show {
        /// Job id
        id: i64,
    },
    /// Show a job's audit trail
    Logs {
        /// Job id
        id: i64,
    },
    /// Reset a job back to Queued
    Reset {
        /// Job id
        id: i64,

        /// Reset even if the job is in an active state
        #[arg(long)]
        force: bool,
    },
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, pool: &SqlitePool) -> Result<()> {
    match command {
        JobCommands::List {
            task,
            state,
            location,
            qa_state,
            instrument,
            limit,
        } => {
            let query = JobQuery {
                task,
                state: state.as_deref().map(parse_state).transpose()?,
                location,
                qa_state: qa_state.as_deref().map(super::parse_qa_state).transpose()?,
                instrument,
                limit: Some(limit),
                ..Default::default()
            };

            let jobs = job_service::find_jobs(pool, &query).await?;

            println!(
                "{:>9}  {:32}  {:14}  {:8}  {:4}  {}",
                "ID", "TAG", "STATE", "LOCATION", "PRI", "TASK"
            );
            for job in jobs {
                println!(
                    "{:>9}  {:32}  {:14}  {:8}  {:4}  {}",
                    job.id,
                    job.tag,
                    job.state.name(),
                    job.location,
                    job.priority,
                    job.task
                );
            }

            Ok(())
        }
        JobCommands::Show { id } => {
            let job = job_service::get_job(pool, id).await?;

            println!("Job {}", job.id);
            println!("  tag:        {}", job.tag);
            println!("  state:      {} (was {})", job.state, job.state_prev);
            println!("  qa state:   {}", job.qa_state);
            println!("  location:   {}", job.location);
            if let Some(foreign_id) = &job.foreign_id {
                println!("  foreign id: {foreign_id}");
            }
            println!("  task:       {}", job.task);
            println!("  mode:       {}", job.mode);
            println!("  priority:   {}", job.priority);
            if let Some(instrument) = &job.instrument {
                println!("  instrument: {instrument}");
            }
            println!("  added:      {}", job.added_at);
            if !job.parameters.is_empty() {
                println!("  parameters: {}", job.parameters);
            }

            let inputs = job_service::get_input_files(pool, id).await?;
            if !inputs.is_empty() {
                println!("  input files:");
                for file in inputs {
                    println!("    {file}");
                }
            }

            let outputs = job_service::get_output_files(pool, id).await?;
            if !outputs.is_empty() {
                println!("  output files:");
                for file in outputs {
                    match file.checksum {
                        Some(sum) => println!("    {} ({})", file.filename, sum),
                        None => println!("    {}", file.filename),
                    }
                }
            }

            let parents = job_service::get_parents(pool, id).await?;
            if !parents.is_empty() {
                println!("  parents:");
                for link in parents {
                    match link.filter {
                        Some(filter) => println!("    {} (filter {})", link.parent_id, filter),
                        None => println!("    {}", link.parent_id),
                    }
                }
            }

            Ok(())
        }
        JobCommands::Logs { id } => {
            for entry in job_service::get_logs(pool, id).await? {
                println!(
                    "{}  {} -> {}  [{}@{}]  {}",
                    entry.logged_at,
                    entry.state_prev.name(),
                    entry.state_new.name(),
                    entry.username,
                    entry.host,
                    entry.message
                );
            }

            Ok(())
        }
        JobCommands::Reset { id, force } => {
            let actor = util::local_actor();
            job_service::reset_job(pool, id, force, &actor).await?;
            println!("Job {id} reset to Queued");

            Ok(())
        }
    }
}
