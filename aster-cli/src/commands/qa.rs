//! QA and note command handlers

use anyhow::Result;
use clap::Subcommand;
use sqlx::SqlitePool;

use aster_registry::service::qa_service;
use aster_runner::util;

use super::parse_qa_state;

/// QA subcommands
#[derive(Subcommand)]
pub enum QaCommands {
    /// Record a quality judgment for a job
    Set {
        /// Job id
        id: i64,

        /// QA status code (G, Q, B, J or ?)
        status: String,

        /// Reason for the judgment
        message: String,
    },
    /// Append an operator note to a job
    Note {
        /// Job id
        id: i64,

        /// Note text
        message: String,
    },
    /// Show a job's QA history and notes
    History {
        /// Job id
        id: i64,
    },
}

/// Handle QA commands
pub async fn handle_qa_command(command: QaCommands, pool: &SqlitePool) -> Result<()> {
    let actor = util::local_actor();

    match command {
        QaCommands::Set {
            id,
            status,
            message,
        } => {
            let status = parse_qa_state(&status)?;
            qa_service::add_qa(pool, id, status, &message, &actor.username).await?;
            println!("Job {id} QA set to {status}");

            Ok(())
        }
        QaCommands::Note { id, message } => {
            qa_service::add_note(pool, id, &message, &actor.username).await?;
            println!("Note added to job {id}");

            Ok(())
        }
        QaCommands::History { id } => {
            let entries = qa_service::get_qa_entries(pool, id).await?;
            if !entries.is_empty() {
                println!("QA history:");
                for entry in entries {
                    println!(
                        "  {}  {}  [{}]  {}",
                        entry.judged_at,
                        entry.status.name(),
                        entry.username,
                        entry.message
                    );
                }
            }

            let notes = qa_service::get_notes(pool, id).await?;
            if !notes.is_empty() {
                println!("Notes:");
                for note in notes {
                    println!("  {}  [{}]  {}", note.noted_at, note.username, note.message);
                }
            }

            Ok(())
        }
    }
}
