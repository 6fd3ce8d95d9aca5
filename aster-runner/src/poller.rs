//! Poller
//!
//! Periodic driver over the full eligible job set. One pass looks at every
//! job at this site, dispatches the executor matching its state, and keeps
//! going past individual failures; the pass reports success only when zero
//! jobs errored. Remote-site jobs are mirrored from the archive's recipe
//! status by foreign id.

use std::collections::HashMap;
use std::sync::Arc;

use aster_core::domain::job::Job;
use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::repository::job::JobQuery;
use aster_registry::service::job_service;
use sqlx::SqlitePool;
use tokio::time;

use crate::config::Config;
use crate::directories;
use crate::executors::{Outcome, advance, etransfer, fetch, ingest, rawingest, run, transfer, validate};
use crate::external::archive::ArchiveClient;
use crate::external::bounded;
use crate::external::feed::RawFeed;
use crate::external::recipe::RecipeRunner;
use crate::util;

/// Periodic pipeline driver.
pub struct Poller {
    pool: SqlitePool,
    config: Config,
    archive: Arc<dyn ArchiveClient>,
    recipe: Arc<dyn RecipeRunner>,
    feed: Option<Arc<dyn RawFeed>>,
    actor: Actor,
}

impl Poller {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        archive: Arc<dyn ArchiveClient>,
        recipe: Arc<dyn RecipeRunner>,
        feed: Option<Arc<dyn RawFeed>>,
    ) -> Self {
        Self {
            pool,
            config,
            archive,
            recipe,
            feed,
            actor: util::local_actor(),
        }
    }

    /// Run poll passes forever at the configured interval.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            "Starting poller for location {} (interval: {:?})",
            self.config.location,
            self.config.poll_interval
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            match self.poll_once().await {
                Ok(true) => tracing::debug!("Poll pass finished without errors"),
                Ok(false) => tracing::warn!("Poll pass finished with job errors"),
                Err(e) => tracing::error!("Poll pass aborted: {}", e),
            }
        }
    }

    /// One full pass. Returns true only when no job errored.
    pub async fn poll_once(&self) -> Result<bool, RegistryError> {
        let mut n_err = 0;

        if let Some(feed) = &self.feed {
            if let Err(e) = rawingest::poll_raw_feed(&self.pool, &self.config, feed.as_ref()).await
            {
                tracing::error!("Raw feed poll failed: {:#}", e);
                n_err += 1;
            }
        }

        n_err += self.poll_local_jobs().await?;
        n_err += self.poll_remote_jobs().await?;

        Ok(n_err == 0)
    }

    /// Advance every eligible job at this site by one step.
    async fn poll_local_jobs(&self) -> Result<u32, RegistryError> {
        tracing::info!("Starting update of {} job status", self.config.location);

        let jobs = job_service::find_jobs(
            &self.pool,
            &JobQuery {
                location: Some(self.config.location.clone()),
                ..Default::default()
            },
        )
        .await?;

        let mut n_err = 0;

        for job in jobs {
            tracing::debug!("Checking state of job {} ({})", job.id, job.state);

            match self.step_job(&job).await {
                Ok(Outcome::Advanced(JobState::Error)) => n_err += 1,
                Ok(Outcome::Failed) => n_err += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Error while updating state of job {}: {}", job.id, e);
                    n_err += 1;
                }
            }
        }

        tracing::info!("Done updating {} job status", self.config.location);

        Ok(n_err)
    }

    async fn step_job(&self, job: &Job) -> Result<Outcome, RegistryError> {
        match job.state {
            JobState::Unknown => validate::validate_job(&self.pool, job, &self.actor).await,
            JobState::Queued => self.queued_step(job).await,
            JobState::Missing => {
                fetch::fetch_job(
                    &self.pool,
                    &self.config,
                    self.archive.as_ref(),
                    job,
                    false,
                    &self.actor,
                )
                .await
            }
            JobState::Waiting => {
                run::run_job(
                    &self.pool,
                    &self.config,
                    self.recipe.as_ref(),
                    job,
                    false,
                    &self.actor,
                )
                .await
            }
            JobState::Processed => {
                transfer::transfer_processed(
                    &self.pool,
                    &self.config,
                    self.archive.as_ref(),
                    job,
                    &self.actor,
                )
                .await
            }
            JobState::Transferring => {
                etransfer::poll_transferring(
                    &self.pool,
                    &self.config,
                    self.archive.as_ref(),
                    job,
                    &self.actor,
                )
                .await
            }
            JobState::Ingestion => {
                ingest::ingest_job(
                    &self.pool,
                    &self.config,
                    self.archive.as_ref(),
                    job,
                    false,
                    &self.actor,
                )
                .await
            }
            // A worker owns these; recovery from a stuck one is an
            // explicit operator reset, never automatic.
            JobState::Fetching | JobState::Running | JobState::Ingesting => Ok(Outcome::Skipped),
            JobState::Complete
            | JobState::Error
            | JobState::Deleted
            | JobState::WontWork => Ok(Outcome::Skipped),
        }
    }

    /// Decide whether a Queued job already has its data or needs a fetch.
    ///
    /// Jobs with unmet parent dependencies are skipped, not errored: the
    /// parents simply have not finished yet.
    async fn queued_step(&self, job: &Job) -> Result<Outcome, RegistryError> {
        let parents = job_service::get_parents(&self.pool, job.id).await?;

        for link in &parents {
            let parent = job_service::get_job(&self.pool, link.parent_id).await?;
            if parent.state != JobState::Complete {
                tracing::debug!(
                    "Job {} waiting for parent {} ({})",
                    job.id,
                    parent.id,
                    parent.state
                );
                return Ok(Outcome::Skipped);
            }
        }

        let inputs = job_service::get_input_files(&self.pool, job.id).await?;
        let input_dir = directories::input_dir(&self.config, job.id);

        let all_on_disk =
            !inputs.is_empty() && inputs.iter().all(|f| input_dir.join(f).is_file());

        if parents.is_empty() && all_on_disk {
            let paths: Vec<std::path::PathBuf> =
                inputs.iter().map(|f| input_dir.join(f)).collect();
            if let Err(e) = fetch::write_input_list(&self.config, job.id, &paths).await {
                tracing::warn!("Cannot write input list for job {}: {:#}", job.id, e);
                return Ok(Outcome::Failed);
            }

            advance(
                &self.pool,
                job.id,
                JobState::Queued,
                JobState::Waiting,
                "All input files present",
                &self.actor,
            )
            .await
        } else {
            advance(
                &self.pool,
                job.id,
                JobState::Queued,
                JobState::Missing,
                "Input files are not on disk",
                &self.actor,
            )
            .await
        }
    }

    /// Mirror the state of remote-site jobs from the archive's recipe
    /// status, correlated by foreign id.
    async fn poll_remote_jobs(&self) -> Result<u32, RegistryError> {
        let jobs = job_service::find_jobs(
            &self.pool,
            &JobQuery {
                location: Some(self.config.remote_location.clone()),
                ..Default::default()
            },
        )
        .await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        let mut by_foreign: HashMap<String, Job> = jobs
            .into_iter()
            .filter_map(|job| job.foreign_id.clone().map(|fid| (fid, job)))
            .collect();

        tracing::info!(
            "Retrieving recipe status from {}",
            self.config.remote_location
        );

        let statuses = match bounded(self.config.external_timeout, self.archive.recipe_status())
            .await
        {
            Ok(statuses) => statuses,
            Err(e) => {
                tracing::error!("Recipe status query failed: {}", e);
                return Ok(1);
            }
        };

        let mut n_err = 0;

        for status in statuses {
            let Some(job) = by_foreign.remove(&status.foreign_id) else {
                tracing::warn!("Foreign id {} is unknown", status.foreign_id);
                continue;
            };

            if status.state == job.state {
                continue;
            }

            // The remote system is authoritative for its own jobs; this is
            // a mirror, not a claim, so the change is unconditioned.
            let message = format!(
                "State at {} changed to {}",
                self.config.remote_location, status.state
            );
            if let Err(e) =
                job_service::change_state(&self.pool, job.id, status.state, &message, None, &self.actor)
                    .await
            {
                tracing::error!("Cannot mirror state of job {}: {}", job.id, e);
                n_err += 1;
                continue;
            }

            if status.state == JobState::Complete && !status.output_files.is_empty() {
                let files: Vec<(String, Option<String>)> = status
                    .output_files
                    .iter()
                    .map(|f| (f.to_lowercase(), None))
                    .collect();
                job_service::set_output_files(&self.pool, job.id, &files).await?;
            }
        }

        for (foreign_id, job) in by_foreign {
            tracing::warn!(
                "No status received for job {} (foreign id {})",
                job.id,
                foreign_id
            );
        }

        Ok(n_err)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::external::archive::{ArchiveFileInfo, RemoteJobStatus};
    use crate::external::recipe::{RecipeContext, RecipeOutcome};
    use crate::external::{ExternalError, ExternalResult};
    use aster_core::domain::job::ProcessingMode;
    use aster_registry::repository::job::NewJob;
    use aster_registry::repository::task_repository;
    use aster_core::domain::task::TaskInfo;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    static TEST_SEQ: AtomicU64 = AtomicU64::new(0);

    /// Removes the per-test directory tree on drop.
    pub(crate) struct TestDir(pub PathBuf);

    impl Drop for TestDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    /// File-backed registry plus a config rooted in a fresh temp tree.
    pub(crate) async fn test_env(name: &str) -> (SqlitePool, Config, TestDir) {
        let seq = TEST_SEQ.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "aster-{name}-{}-{seq}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let db_path = dir.join("registry.db");
        let url = format!("sqlite://{}", db_path.display());
        let pool = aster_registry::db::create_pool(&url).await.unwrap();
        aster_registry::db::run_migrations(&pool).await.unwrap();

        let mut config = Config::new("JAC".to_string(), dir.join("data"));
        config.database_url = url;
        config.external_timeout = Duration::from_millis(200);
        config.recipe_timeout = Duration::from_secs(5);
        config.max_tries = 1;
        config.retry_delay = Duration::from_millis(1);

        (pool, config, TestDir(dir))
    }

    /// In-memory archive double: a map of archived files plus canned
    /// recipe statuses. `fetch_delay` simulates a hung endpoint.
    pub(crate) struct MockArchive {
        pub files: Mutex<HashMap<String, Option<String>>>,
        pub statuses: Mutex<Vec<RemoteJobStatus>>,
        pub fetch_delay: Option<Duration>,
    }

    impl MockArchive {
        pub(crate) fn new() -> Self {
            Self {
                files: Mutex::new(HashMap::new()),
                statuses: Mutex::new(Vec::new()),
                fetch_delay: None,
            }
        }

        pub(crate) fn add_file(&self, name: &str, checksum: Option<String>) {
            self.files.lock().unwrap().insert(name.to_string(), checksum);
        }
    }

    #[async_trait]
    impl ArchiveClient for MockArchive {
        async fn file_info(&self, filename: &str) -> ExternalResult<Option<ArchiveFileInfo>> {
            let files = self.files.lock().unwrap();
            Ok(files.get(filename).map(|checksum| ArchiveFileInfo {
                filename: filename.to_string(),
                checksum: checksum.clone(),
            }))
        }

        async fn fetch_file(&self, filename: &str, dest_dir: &Path) -> ExternalResult<PathBuf> {
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }

            let known = self.files.lock().unwrap().contains_key(filename);
            if !known {
                return Err(ExternalError::Rejected(format!(
                    "file {filename} does not exist in the archive"
                )));
            }

            let dest = dest_dir.join(filename);
            tokio::fs::write(&dest, b"raw data")
                .await
                .map_err(|e| ExternalError::service(e.to_string()))?;
            Ok(dest)
        }

        async fn recipe_status(&self) -> ExternalResult<Vec<RemoteJobStatus>> {
            Ok(self.statuses.lock().unwrap().clone())
        }
    }

    /// Recipe double: writes one reduced file into the output directory.
    pub(crate) struct MockRecipe {
        pub fail: bool,
    }

    #[async_trait]
    impl RecipeRunner for MockRecipe {
        async fn run(&self, ctx: &RecipeContext) -> ExternalResult<RecipeOutcome> {
            if self.fail {
                return Err(ExternalError::service("recipe crashed"));
            }

            let name = format!("reduced_{:09}.fits", ctx.job_id);
            tokio::fs::write(ctx.output_dir.join(&name), b"reduced data")
                .await
                .map_err(|e| ExternalError::service(e.to_string()))?;

            Ok(RecipeOutcome {
                output_files: vec![name],
                log_file: ctx.log_dir.join("recipe.log"),
            })
        }
    }

    fn raw_job(tag: &str, task: &str) -> NewJob {
        NewJob {
            tag: tag.to_string(),
            location: "JAC".to_string(),
            foreign_id: None,
            mode: ProcessingMode::Obs,
            parameters: String::new(),
            priority: 0,
            task: task.to_string(),
            instrument: Some("SCUBA-2".to_string()),
        }
    }

    fn poller(
        pool: &SqlitePool,
        config: &Config,
        archive: &Arc<MockArchive>,
        recipe: &Arc<MockRecipe>,
    ) -> Poller {
        Poller::new(
            pool.clone(),
            config.clone(),
            archive.clone() as Arc<dyn ArchiveClient>,
            recipe.clone() as Arc<dyn RecipeRunner>,
            None,
        )
    }

    #[tokio::test]
    async fn test_full_local_pipeline() {
        let (pool, config, _guard) = test_env("pipeline").await;
        let archive = Arc::new(MockArchive::new());
        let recipe = Arc::new(MockRecipe { fail: false });
        let poller = poller(&pool, &config, &archive, &recipe);

        task_repository::upsert(
            &pool,
            &TaskInfo {
                etransfer: Some(true),
                ..TaskInfo::new("night-850")
            },
        )
        .await
        .unwrap();

        let raw_name = "s8a20140321_00042_0001.sdf";
        archive.add_file(raw_name, None);

        let id = job_service::create_job(
            &pool,
            &raw_job("obs-42", "night-850"),
            &[raw_name.to_string()],
            &[],
        )
        .await
        .unwrap();

        // One state step per pass: validate, presence check, fetch, run,
        // e-transfer staging.
        for expected in [
            JobState::Queued,
            JobState::Missing,
            JobState::Waiting,
            JobState::Processed,
            JobState::Transferring,
        ] {
            assert!(poller.poll_once().await.unwrap());
            assert_eq!(
                job_service::get_job(&pool, id).await.unwrap().state,
                expected,
                "after pass expecting {expected}"
            );
        }

        // Output was recorded with its checksum during the run step.
        let outputs = job_service::get_output_files(&pool, id).await.unwrap();
        assert_eq!(outputs.len(), 1);
        let reduced = outputs[0].clone();
        assert!(reduced.checksum.is_some());

        // The staged file sits in the e-transfer "new" directory; the job
        // holds position while the transfer system works.
        let staged = config.etransfer_trans_dir.join("new").join(&reduced.filename);
        assert!(staged.exists());
        assert!(poller.poll_once().await.unwrap());
        assert_eq!(
            job_service::get_job(&pool, id).await.unwrap().state,
            JobState::Transferring
        );

        // Simulate the transfer system delivering the file to the archive.
        tokio::fs::remove_file(&staged).await.unwrap();
        archive.add_file(&reduced.filename, reduced.checksum.clone());

        // Transfer confirmed, then ingested.
        assert!(poller.poll_once().await.unwrap());
        assert_eq!(
            job_service::get_job(&pool, id).await.unwrap().state,
            JobState::Ingestion
        );
        assert!(poller.poll_once().await.unwrap());
        assert_eq!(
            job_service::get_job(&pool, id).await.unwrap().state,
            JobState::Complete
        );

        // The audit trail shows the whole path, one row per transition.
        let logs = job_service::get_logs(&pool, id).await.unwrap();
        let states: Vec<JobState> = logs.iter().map(|l| l.state_new).collect();
        assert_eq!(
            states,
            vec![
                JobState::Queued,
                JobState::Missing,
                JobState::Fetching,
                JobState::Waiting,
                JobState::Running,
                JobState::Processed,
                JobState::Transferring,
                JobState::Ingestion,
                JobState::Ingesting,
                JobState::Complete,
            ]
        );
        for pair in logs.windows(2) {
            assert_eq!(pair[1].state_prev, pair[0].state_new);
            assert!(pair[0].logged_at <= pair[1].logged_at);
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout_parks_job_in_error() {
        let (pool, config, _guard) = test_env("timeout").await;
        let mut archive = MockArchive::new();
        archive.fetch_delay = Some(Duration::from_secs(60));
        archive.add_file("s8a20140321_00042_0001.sdf", None);
        let archive = Arc::new(archive);
        let recipe = Arc::new(MockRecipe { fail: false });
        let poller = poller(&pool, &config, &archive, &recipe);

        let id = job_service::create_job(
            &pool,
            &raw_job("obs-7", "night-850"),
            &["s8a20140321_00042_0001.sdf".to_string()],
            &[],
        )
        .await
        .unwrap();

        // Validate, presence check, then the fetch that times out.
        assert!(poller.poll_once().await.unwrap());
        assert!(poller.poll_once().await.unwrap());
        assert!(!poller.poll_once().await.unwrap());

        let job = job_service::get_job(&pool, id).await.unwrap();
        assert_eq!(job.state, JobState::Error);
        assert_eq!(job.state_prev, JobState::Fetching);

        let logs = job_service::get_logs(&pool, id).await.unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.state_new, JobState::Error);
        assert!(last.message.contains("timed out"), "message: {}", last.message);

        // A re-poll leaves the errored job alone until an operator reset.
        let log_count = logs.len();
        assert!(poller.poll_once().await.unwrap());
        let job = job_service::get_job(&pool, id).await.unwrap();
        assert_eq!(job.state, JobState::Error);
        assert_eq!(
            job_service::get_logs(&pool, id).await.unwrap().len(),
            log_count
        );
    }

    #[tokio::test]
    async fn test_failed_recipe_moves_job_to_error() {
        let (pool, config, _guard) = test_env("recipe-fail").await;
        let archive = Arc::new(MockArchive::new());
        archive.add_file("s8a20140321_00042_0001.sdf", None);
        let recipe = Arc::new(MockRecipe { fail: true });
        let poller = poller(&pool, &config, &archive, &recipe);

        let id = job_service::create_job(
            &pool,
            &raw_job("obs-9", "night-850"),
            &["s8a20140321_00042_0001.sdf".to_string()],
            &[],
        )
        .await
        .unwrap();

        for _ in 0..3 {
            poller.poll_once().await.unwrap();
        }
        // The run pass fails.
        assert!(!poller.poll_once().await.unwrap());

        let job = job_service::get_job(&pool, id).await.unwrap();
        assert_eq!(job.state, JobState::Error);

        let logs = job_service::get_logs(&pool, id).await.unwrap();
        assert!(logs.last().unwrap().message.contains("recipe crashed"));
    }

    #[tokio::test]
    async fn test_remote_jobs_are_mirrored() {
        let (pool, config, _guard) = test_env("remote").await;
        let archive = Arc::new(MockArchive::new());
        let recipe = Arc::new(MockRecipe { fail: false });
        let poller = poller(&pool, &config, &archive, &recipe);

        let mut remote = raw_job("remote-1", "night-850");
        remote.location = "CADC".to_string();
        remote.foreign_id = Some("ri-0001".to_string());
        let id = job_service::create_job(&pool, &remote, &[], &[]).await.unwrap();

        archive.statuses.lock().unwrap().push(RemoteJobStatus {
            foreign_id: "ri-0001".to_string(),
            state: JobState::Complete,
            output_files: vec!["REDUCED_0001.FITS".to_string()],
        });

        assert!(poller.poll_once().await.unwrap());

        let job = job_service::get_job(&pool, id).await.unwrap();
        assert_eq!(job.state, JobState::Complete);

        // Output filenames are stored lower case.
        let outputs = job_service::get_output_files(&pool, id).await.unwrap();
        assert_eq!(outputs[0].filename, "reduced_0001.fits");

        // Unchanged status on the next pass writes nothing.
        let log_count = job_service::get_logs(&pool, id).await.unwrap().len();
        assert!(poller.poll_once().await.unwrap());
        assert_eq!(
            job_service::get_logs(&pool, id).await.unwrap().len(),
            log_count
        );
    }

    #[tokio::test]
    async fn test_child_waits_for_parents() {
        let (pool, config, _guard) = test_env("parents").await;
        let archive = Arc::new(MockArchive::new());
        let recipe = Arc::new(MockRecipe { fail: false });
        let poller = poller(&pool, &config, &archive, &recipe);
        let actor = Actor::new("testhost", "testuser");

        let parent = job_service::create_job(&pool, &raw_job("parent-1", "t1"), &[], &[])
            .await
            .unwrap();
        let child = job_service::create_job(
            &pool,
            &raw_job("child-1", "t1-coadd"),
            &[],
            &[(parent, None)],
        )
        .await
        .unwrap();

        // Move the child to Queued; the parent stays incomplete.
        job_service::change_state(
            &pool,
            child,
            JobState::Queued,
            "Job validated",
            Some(JobState::Unknown),
            &actor,
        )
        .await
        .unwrap();

        // Parent not complete: child is skipped, not errored, not moved.
        poller.poll_once().await.unwrap();
        assert_eq!(
            job_service::get_job(&pool, child).await.unwrap().state,
            JobState::Queued
        );

        // Complete the parent (forced walk for test setup), give it an
        // output, and the child advances to Missing for assembly.
        job_service::change_state(&pool, parent, JobState::Complete, "done", None, &actor)
            .await
            .unwrap();
        job_service::set_output_files(
            &pool,
            parent,
            &[("reduced_parent.fits".to_string(), None)],
        )
        .await
        .unwrap();

        poller.poll_once().await.unwrap();
        assert_eq!(
            job_service::get_job(&pool, child).await.unwrap().state,
            JobState::Missing
        );
    }
}
