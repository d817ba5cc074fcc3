//! Index rebuild jobs for leaving data import mode. Every index of the
//! database is rebuilt as its own job; jobs run concurrently and each one
//! retries transient backend errors under a bounded backoff before giving up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::model::IndexOrdering;
use crate::repository::interface::{Error, Repository};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Connection-level trouble is worth retrying; anything the backend decided
/// about (constraint violations, malformed statements) is not.
fn is_transient(error: &Error) -> bool {
    matches!(
        error,
        Error::SqlxError(
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
        )
    )
}

/// Run `op` until it succeeds, retrying transient failures with exponential
/// backoff up to `max_attempts`.
pub(crate) async fn run_critical<F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(error) if attempt < policy.max_attempts && is_transient(&error) => {
                warn!(
                    attempt,
                    "transient catalog error, retrying in {backoff:?}: {error:?}"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// One physical index to (re)build.
#[derive(Debug, Clone)]
pub(crate) struct IndexRebuild {
    pub database_identifier: String,
    pub table_identifier: String,
    pub index_identifier: String,
    pub unique: bool,
    pub columns: Vec<(String, IndexOrdering)>,
}

/// Rebuild all indexes concurrently. Every job runs to completion regardless
/// of failures elsewhere; the first error (in job order) is reported.
pub(crate) async fn rebuild_indexes(
    repository: Arc<dyn Repository>,
    policy: &RetryPolicy,
    jobs: Vec<IndexRebuild>,
) -> Result<(), Error> {
    debug!("rebuilding {} indexes", jobs.len());
    let tasks = jobs.iter().map(|job| {
        let repository = repository.clone();
        async move {
            run_critical(policy, || {
                let repository = repository.clone();
                async move {
                    // Drop first so a rebuild interrupted halfway is
                    // restartable.
                    repository
                        .drop_physical_index(
                            &job.database_identifier,
                            &job.index_identifier,
                        )
                        .await?;
                    repository
                        .create_physical_index(
                            &job.database_identifier,
                            &job.table_identifier,
                            &job.index_identifier,
                            job.unique,
                            &job.columns,
                        )
                        .await
                }
            })
            .await
        }
    });

    for result in join_all(tasks).await {
        result?;
    }
    Ok(())
}
