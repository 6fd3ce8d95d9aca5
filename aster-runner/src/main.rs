//! Aster Runner daemon
//!
//! Long-running pipeline driver for one site: opens the shared registry,
//! wires up the production collaborators, and loops the poller at the
//! configured interval. Several runners (and one-shot CLI invocations) may
//! share one registry; all coordination goes through its transactional
//! state-change contract.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aster_runner::config::Config;
use aster_runner::external::archive::HttpArchiveClient;
use aster_runner::external::feed::{RawFeed, SpoolDirFeed};
use aster_runner::external::recipe::WrapperRecipeRunner;
use aster_runner::poller::Poller;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aster_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting aster runner");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;

    tracing::info!(
        "Loaded configuration: location={}, base_dir={}",
        config.location,
        config.base_dir.display()
    );

    let pool = aster_registry::db::create_pool(&config.database_url)
        .await
        .context("Failed to open the registry database")?;
    aster_registry::db::run_migrations(&pool)
        .await
        .context("Failed to migrate the registry database")?;

    tracing::info!("Registry opened at {}", config.database_url);

    let archive = Arc::new(
        HttpArchiveClient::new(config.archive_url.clone(), config.external_timeout)
            .context("Failed to build archive client")?,
    );

    let wrapper =
        std::env::var("ASTER_RECIPE_WRAPPER").unwrap_or_else(|_| "aster-wrapdr".to_string());
    let recipe = Arc::new(WrapperRecipeRunner::new(wrapper));

    let feed = config
        .raw_spool_dir
        .as_ref()
        .map(|dir| Arc::new(SpoolDirFeed::new(dir)) as Arc<dyn RawFeed>);

    let poller = Poller::new(pool, config, archive, recipe, feed);

    tracing::info!("Runner initialized; entering poll loop");

    poller.run().await
}
