//! Runner configuration
//!
//! All timeouts, directories, and retry defaults are configurable to allow
//! tuning for different deployment sites. Per-task settings in the
//! registry override the retry defaults given here.

use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Registry database URL (e.g. "sqlite:///var/lib/aster/registry.db").
    pub database_url: String,

    /// Site name this runner is responsible for; only jobs with this
    /// location are claimed.
    pub location: String,

    /// Remote site whose jobs are mirrored by the poller via foreign ids.
    pub remote_location: String,

    /// Root under which per-job input/scratch/output directories live.
    pub base_dir: PathBuf,

    /// Staging directory for e-transfer; must be on the same filesystem as
    /// `trans_dir` so the final rename is atomic.
    pub etransfer_scratch_dir: PathBuf,

    /// Transfer-system pickup directory, containing `new`, `replace`, and
    /// `reject` subdirectories.
    pub etransfer_trans_dir: PathBuf,

    /// Base URL of the archive file/metadata service.
    pub archive_url: String,

    /// Spool directory for raw observation announcements, if this runner
    /// performs raw ingest.
    pub raw_spool_dir: Option<PathBuf>,

    /// How often the poller makes a full pass.
    pub poll_interval: Duration,

    /// Bound on any single external call (archive lookups, file fetches,
    /// transfer commands).
    pub external_timeout: Duration,

    /// Bound on one recipe execution.
    pub recipe_timeout: Duration,

    /// Default retry policy for external calls; tasks may override.
    pub max_tries: u32,
    pub retry_delay: Duration,

    /// Refuse to fetch when the assembled input tree already uses more
    /// than this many bytes. `None` disables the guard.
    pub fetch_usage_limit: Option<u64>,

    /// How many times a job may be requeued to Missing after its input
    /// files vanished before it is put into Error instead.
    pub max_missing_requeue: i64,
}

impl Config {
    /// Creates a new configuration with defaults for the given site.
    pub fn new(location: String, base_dir: PathBuf) -> Self {
        let etransfer_scratch_dir = base_dir.join("etransfer/scratch");
        let etransfer_trans_dir = base_dir.join("etransfer/trans");
        Self {
            database_url: "sqlite:aster.db".to_string(),
            location,
            remote_location: "CADC".to_string(),
            base_dir,
            etransfer_scratch_dir,
            etransfer_trans_dir,
            archive_url: "http://localhost:8080".to_string(),
            raw_spool_dir: None,
            poll_interval: Duration::from_secs(60),
            external_timeout: Duration::from_secs(300),
            recipe_timeout: Duration::from_secs(4 * 3600),
            max_tries: 3,
            retry_delay: Duration::from_secs(30),
            fetch_usage_limit: None,
            max_missing_requeue: 2,
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expected environment variables:
    /// - ASTER_LOCATION (required)
    /// - ASTER_BASE_DIR (required)
    /// - ASTER_DATABASE_URL (optional, default: sqlite:aster.db)
    /// - ASTER_REMOTE_LOCATION (optional, default: CADC)
    /// - ASTER_ARCHIVE_URL (optional, default: http://localhost:8080)
    /// - ASTER_RAW_SPOOL_DIR (optional)
    /// - ASTER_POLL_INTERVAL (optional, seconds, default: 60)
    /// - ASTER_EXTERNAL_TIMEOUT (optional, seconds, default: 300)
    /// - ASTER_RECIPE_TIMEOUT (optional, seconds, default: 14400)
    /// - ASTER_MAX_TRIES (optional, default: 3)
    /// - ASTER_RETRY_DELAY (optional, seconds, default: 30)
    /// - ASTER_FETCH_USAGE_LIMIT (optional, bytes)
    /// - ASTER_MAX_MISSING_REQUEUE (optional, default: 2)
    pub fn from_env() -> anyhow::Result<Self> {
        let location = std::env::var("ASTER_LOCATION")
            .map_err(|_| anyhow::anyhow!("ASTER_LOCATION environment variable not set"))?;

        let base_dir = std::env::var("ASTER_BASE_DIR")
            .map_err(|_| anyhow::anyhow!("ASTER_BASE_DIR environment variable not set"))?;

        let mut config = Config::new(location, PathBuf::from(base_dir));

        if let Ok(url) = std::env::var("ASTER_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(remote) = std::env::var("ASTER_REMOTE_LOCATION") {
            config.remote_location = remote;
        }
        if let Ok(url) = std::env::var("ASTER_ARCHIVE_URL") {
            config.archive_url = url;
        }
        if let Ok(dir) = std::env::var("ASTER_RAW_SPOOL_DIR") {
            config.raw_spool_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = env_u64("ASTER_POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("ASTER_EXTERNAL_TIMEOUT") {
            config.external_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("ASTER_RECIPE_TIMEOUT") {
            config.recipe_timeout = Duration::from_secs(secs);
        }
        if let Some(tries) = env_u64("ASTER_MAX_TRIES") {
            config.max_tries = tries as u32;
        }
        if let Some(secs) = env_u64("ASTER_RETRY_DELAY") {
            config.retry_delay = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_u64("ASTER_FETCH_USAGE_LIMIT") {
            config.fetch_usage_limit = Some(bytes);
        }
        if let Some(n) = env_u64("ASTER_MAX_MISSING_REQUEUE") {
            config.max_missing_requeue = n as i64;
        }

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.location.is_empty() {
            anyhow::bail!("location cannot be empty");
        }

        if self.database_url.is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.external_timeout.as_secs() == 0 {
            anyhow::bail!("external_timeout must be greater than 0");
        }

        if self.max_tries == 0 {
            anyhow::bail!("max_tries must be greater than 0");
        }

        if self.etransfer_scratch_dir == self.etransfer_trans_dir {
            anyhow::bail!("etransfer scratch and trans directories must differ");
        }

        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::new("JAC".to_string(), PathBuf::from("/tmp/aster"));
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.max_tries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::new("JAC".to_string(), PathBuf::from("/tmp/aster"));
        assert!(config.validate().is_ok());

        config.location = String::new();
        assert!(config.validate().is_err());

        config.location = "JAC".to_string();
        config.max_tries = 0;
        assert!(config.validate().is_err());

        config.max_tries = 3;
        config.etransfer_trans_dir = config.etransfer_scratch_dir.clone();
        assert!(config.validate().is_err());
    }
}
