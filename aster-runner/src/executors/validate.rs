//! Validate executor
//!
//! First look at a newly created job: check that it has inputs at all and
//! that the raw filenames follow the naming conventions, then queue it.

use aster_core::domain::job::Job;
use aster_core::domain::log::Actor;
use aster_core::domain::state::JobState;
use aster_registry::RegistryError;
use aster_registry::service::job_service;
use sqlx::SqlitePool;

use super::{Outcome, advance, fail};
use crate::namecheck;

/// Validate one Unknown job.
pub async fn validate_job(
    pool: &SqlitePool,
    job: &Job,
    actor: &Actor,
) -> Result<Outcome, RegistryError> {
    let inputs = job_service::get_input_files(pool, job.id).await?;
    let parents = job_service::get_parents(pool, job.id).await?;

    if inputs.is_empty() && parents.is_empty() {
        return advance(
            pool,
            job.id,
            JobState::Unknown,
            JobState::WontWork,
            "No input files or parent jobs; job cannot be processed",
            actor,
        )
        .await;
    }

    let bad = namecheck::invalid_names(&inputs);
    if !bad.is_empty() {
        return fail(
            pool,
            job.id,
            JobState::Unknown,
            &format!("Invalid input filenames: {}", bad.join(", ")),
            actor,
        )
        .await;
    }

    advance(
        pool,
        job.id,
        JobState::Unknown,
        JobState::Queued,
        "Job validated",
        actor,
    )
    .await
}
