//! Aster CLI
//!
//! Command-line interface to the processing registry: queries, QA, job
//! submission, and one-shot executor runs. A thin client: all invariants
//! live in the registry and the executors.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "aster")]
#[command(about = "Aster data-reduction pipeline control", long_about = None)]
struct Cli {
    /// Registry database URL
    #[arg(long, env = "ASTER_DATABASE_URL", default_value = "sqlite:aster.db")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aster_cli=info,aster_runner=info,aster_registry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let pool = aster_registry::db::create_pool(&cli.database_url).await?;
    aster_registry::db::run_migrations(&pool).await?;

    handle_command(cli.command, &pool).await
}
