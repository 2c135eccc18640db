//! Concurrent download of changed files into a staging area

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::diff::Diff;
use crate::error::{FailureRecord, Operation, Result, UpdateError};
use crate::mirror::Mirror;
use crate::staging::StagingArea;

/// Default number of concurrent downloads
pub const DEFAULT_CONCURRENCY: usize = 12;

/// What happened to one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Downloaded and staged in this run
    Downloaded,
    /// Already staged by an earlier run
    Cached,
    /// Failed; see the batch failures
    Failed,
}

/// One completed attempt, reported in completion order
#[derive(Debug, Clone, Copy)]
pub struct FetchProgress<'a> {
    /// Attempts still outstanding after this one
    pub remaining: usize,
    /// Path just processed
    pub path: &'a str,
    /// Result of the attempt
    pub outcome: FetchOutcome,
}

/// Result of a whole batch
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Files downloaded in this run
    pub downloaded: usize,
    /// Files found already staged
    pub cached: usize,
    /// Per-file failures; the batch ran to completion regardless
    pub failures: Vec<FailureRecord>,
}

impl FetchReport {
    /// Whether every file is now staged
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Downloads `new ∪ replace` with a bounded worker pool
pub struct FetchCoordinator<M: ?Sized> {
    mirror: Arc<M>,
    concurrency: usize,
}

impl<M: Mirror + ?Sized + 'static> FetchCoordinator<M> {
    /// Create a coordinator; `concurrency` is clamped to at least 1
    #[must_use]
    pub fn new(mirror: Arc<M>, concurrency: usize) -> Self {
        Self {
            mirror,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch every path in `diff.new ∪ diff.replace` into `staging`.
    ///
    /// Paths already staged are skipped. A failed file is recorded and left
    /// absent from staging; it never stops its siblings. `on_progress` runs
    /// once per finished attempt, in completion order.
    pub async fn fetch_all<F>(
        &self,
        version: &str,
        diff: &Diff,
        staging: &StagingArea,
        mut on_progress: F,
    ) -> FetchReport
    where
        F: FnMut(FetchProgress<'_>),
    {
        let mut pending: BTreeSet<String> = diff.to_fetch().map(ToString::to_string).collect();
        let mut remaining = pending.len();
        let mut report = FetchReport::default();
        debug!(version, files = remaining, workers = self.concurrency, "fetching files");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for path in pending.iter().cloned() {
            let mirror = Arc::clone(&self.mirror);
            let permits = Arc::clone(&permits);
            let staging = staging.clone();
            let version = version.to_string();

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => fetch_one(mirror.as_ref(), &version, &path, &staging).await,
                    Err(e) => Err(UpdateError::Io(std::io::Error::other(e))),
                };
                (path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (path, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // Path is recovered from `pending` after the loop
                    warn!("fetch worker aborted: {e}");
                    continue;
                }
            };
            pending.remove(&path);
            remaining -= 1;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(path = %path, "download failed: {e}");
                    report
                        .failures
                        .push(FailureRecord::from_error(path.as_str(), Operation::Download, e));
                    FetchOutcome::Failed
                }
            };
            match outcome {
                FetchOutcome::Downloaded => report.downloaded += 1,
                FetchOutcome::Cached => report.cached += 1,
                FetchOutcome::Failed => {}
            }

            on_progress(FetchProgress {
                remaining,
                path: &path,
                outcome,
            });
        }

        for path in pending {
            remaining -= 1;
            report.failures.push(FailureRecord::new(
                path.as_str(),
                Operation::Download,
                "worker aborted",
            ));
            on_progress(FetchProgress {
                remaining,
                path: &path,
                outcome: FetchOutcome::Failed,
            });
        }

        debug!(
            downloaded = report.downloaded,
            cached = report.cached,
            failed = report.failures.len(),
            "fetch batch finished"
        );
        report
    }
}

async fn fetch_one<M: Mirror + ?Sized>(
    mirror: &M,
    version: &str,
    path: &str,
    staging: &StagingArea,
) -> Result<FetchOutcome> {
    if staging.contains(path) {
        return Ok(FetchOutcome::Cached);
    }

    let data = mirror.fetch_file(version, path).await?;

    let staging = staging.clone();
    let key = path.to_string();
    tokio::task::spawn_blocking(move || staging.write(&key, &data))
        .await
        .map_err(|e| UpdateError::Io(std::io::Error::other(e)))?
        .map_err(|e| UpdateError::DownloadFailed {
            path: path.to_string(),
            reason: format!("cannot stage file: {e}"),
        })?;

    Ok(FetchOutcome::Downloaded)
}
