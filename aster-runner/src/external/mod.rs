//! External collaborator seams
//!
//! The core never talks to the archive, the recipe system, or the raw
//! data feed directly: each is a narrow trait here, implemented over HTTP
//! or process spawning in production and by hand-rolled doubles in tests.
//! Every call is fallible and bounded; timeouts become `ExternalError`
//! rather than held claims.

pub mod archive;
pub mod feed;
pub mod recipe;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for external collaborator calls.
pub type ExternalResult<T> = std::result::Result<T, ExternalError>;

/// Errors from external collaborators.
#[derive(Debug, Error)]
pub enum ExternalError {
    /// The call exceeded its bounded timeout.
    #[error("external call timed out after {0:?}")]
    Timeout(Duration),

    /// The service failed; `tries` records how many attempts were made.
    #[error("external service error after {tries} tries: {message}")]
    Service { tries: u32, message: String },

    /// The remote system explicitly refused the request; never retried.
    #[error("rejected by remote system: {0}")]
    Rejected(String),
}

impl ExternalError {
    pub fn service(message: impl Into<String>) -> Self {
        ExternalError::Service {
            tries: 1,
            message: message.into(),
        }
    }
}

/// Bound a future by `limit`, mapping expiry to `ExternalError::Timeout`.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> ExternalResult<T>
where
    F: Future<Output = ExternalResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExternalError::Timeout(limit)),
    }
}

/// Retry an external call up to `max_tries` times with a fixed delay.
///
/// Explicit rejections are surfaced immediately; transient failures are
/// retried until the budget is exhausted, at which point the error carries
/// the total attempt count.
pub async fn with_retries<T, F, Fut>(
    max_tries: u32,
    delay: Duration,
    mut op: F,
) -> ExternalResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExternalResult<T>>,
{
    let mut tries = 0;

    loop {
        tries += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(ExternalError::Rejected(message)) => {
                return Err(ExternalError::Rejected(message));
            }
            Err(e) if tries >= max_tries => {
                return Err(ExternalError::Service {
                    tries,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    "External call failed (attempt {}/{}): {}",
                    tries,
                    max_tries,
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retries_eventually_succeeds() {
        let attempts = AtomicU32::new(0);

        let result = with_retries(3, Duration::from_millis(1), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ExternalError::service("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_reports_attempt_count() {
        let result: ExternalResult<()> = with_retries(2, Duration::from_millis(1), || async {
            Err(ExternalError::service("down"))
        })
        .await;

        match result.unwrap_err() {
            ExternalError::Service { tries, .. } => assert_eq!(tries, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: ExternalResult<()> = with_retries(5, Duration::from_millis(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ExternalError::Rejected("bad checksum".into())) }
        })
        .await;

        assert!(matches!(result.unwrap_err(), ExternalError::Rejected(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: ExternalResult<()> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result.unwrap_err(), ExternalError::Timeout(_)));
    }
}
