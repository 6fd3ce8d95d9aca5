//! Raw ingest executor
//!
//! Turns announced raw observation groups into registry jobs. Re-polling
//! is idempotent: a group whose tag already exists is skipped quietly, so
//! a crashed pass or a re-delivered announcement never double-creates.

use aster_registry::RegistryError;
use aster_registry::repository::job::NewJob;
use aster_registry::service::job_service;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::external::bounded;
use crate::external::feed::RawFeed;

/// Poll the raw feed and create jobs for new observation groups.
///
/// Returns how many jobs were created. Individual bad announcements are
/// logged and skipped; only a failure of the feed itself is an error.
pub async fn poll_raw_feed(
    pool: &SqlitePool,
    config: &Config,
    feed: &dyn RawFeed,
) -> anyhow::Result<u32> {
    let observations = bounded(config.external_timeout, feed.new_observations()).await?;

    let mut created = 0;

    for obs in observations {
        let new = NewJob {
            tag: obs.tag.clone(),
            location: config.location.clone(),
            foreign_id: None,
            mode: obs.mode,
            parameters: obs.parameters.clone(),
            priority: obs.priority,
            task: obs.task.clone(),
            instrument: Some(obs.instrument.clone()),
        };

        match job_service::create_job(pool, &new, &obs.files, &[]).await {
            Ok(job_id) => {
                tracing::info!(
                    "Created job {} for observation group {:?} ({} files)",
                    job_id,
                    obs.tag,
                    obs.files.len()
                );
                created += 1;
            }
            Err(RegistryError::DuplicateTag(tag)) => {
                tracing::debug!("Observation group {:?} is already registered", tag);
            }
            Err(e) => {
                tracing::warn!("Could not register observation group {:?}: {}", obs.tag, e);
            }
        }
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ExternalResult;
    use crate::external::feed::RawObservation;
    use aster_core::domain::job::ProcessingMode;
    use aster_core::domain::state::JobState;
    use async_trait::async_trait;

    struct FixedFeed(Vec<RawObservation>);

    #[async_trait]
    impl RawFeed for FixedFeed {
        async fn new_observations(&self) -> ExternalResult<Vec<RawObservation>> {
            Ok(self.0.clone())
        }
    }

    fn observation(tag: &str) -> RawObservation {
        RawObservation {
            tag: tag.to_string(),
            task: "night-850".to_string(),
            instrument: "SCUBA-2".to_string(),
            mode: ProcessingMode::Obs,
            priority: 5,
            parameters: String::new(),
            files: vec!["s8a20140321_00042_0001.sdf".to_string()],
        }
    }

    #[tokio::test]
    async fn test_raw_ingest_is_idempotent() {
        let (pool, config, _guard) = crate::poller::tests::test_env("rawingest").await;

        let feed = FixedFeed(vec![observation("obs-a"), observation("obs-b")]);

        assert_eq!(poll_raw_feed(&pool, &config, &feed).await.unwrap(), 2);

        // Same announcements again: nothing new is created.
        assert_eq!(poll_raw_feed(&pool, &config, &feed).await.unwrap(), 0);

        let job = job_service::get_job_by_tag(&pool, "obs-a").await.unwrap();
        assert_eq!(job.state, JobState::Unknown);
        assert_eq!(job.priority, 5);
        assert_eq!(job.instrument.as_deref(), Some("SCUBA-2"));
        assert_eq!(
            job_service::get_input_files(&pool, job.id).await.unwrap().len(),
            1
        );
    }
}
