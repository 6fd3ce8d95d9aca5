//! Commands module
//!
//! Defines all CLI commands and their handlers. The command enumeration is
//! typed and resolved here at the boundary; nothing downstream dispatches
//! on strings.

mod action;
mod job;
mod qa;
mod submit;
mod task;

pub use action::ActionCommands;
pub use job::JobCommands;
pub use qa::QaCommands;
pub use submit::SubmitCommands;
pub use task::TaskCommands;

use anyhow::Result;
use clap::Subcommand;
use sqlx::SqlitePool;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Job queries and administration
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Submit processing jobs
    Submit {
        #[command(subcommand)]
        command: SubmitCommands,
    },
    /// Quality assessment and operator notes
    Qa {
        #[command(subcommand)]
        command: QaCommands,
    },
    /// One-shot executor runs and poll passes
    Action {
        #[command(subcommand)]
        command: ActionCommands,
    },
    /// Task configuration
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, pool: &SqlitePool) -> Result<()> {
    match command {
        Commands::Job { command } => job::handle_job_command(command, pool).await,
        Commands::Submit { command } => submit::handle_submit_command(command, pool).await,
        Commands::Qa { command } => qa::handle_qa_command(command, pool).await,
        Commands::Action { command } => action::handle_action_command(command, pool).await,
        Commands::Task { command } => task::handle_task_command(command, pool).await,
    }
}

/// Parse a single-character job state code.
pub(crate) fn parse_state(code: &str) -> Result<aster_core::domain::state::JobState> {
    aster_core::domain::state::JobState::from_code(code)
        .map_err(|e| anyhow::anyhow!("{e} (known codes: ? Q M F W S P X I G Y E D Z)"))
}

/// Parse a single-character QA state code.
pub(crate) fn parse_qa_state(code: &str) -> Result<aster_core::domain::qa::QaState> {
    aster_core::domain::qa::QaState::from_code(code)
        .map_err(|e| anyhow::anyhow!("{e} (known codes: ? G Q B J)"))
}
