//! Pipeline orchestration: expand the matrix once, run every job, collect results.

use crate::error::ConfigError;
use crate::job::{JobResult, JobRunner};
use crate::matrix::{expand_matrix, JobDescriptor, MatrixDefinition};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

/// Results of a run keyed by target.
pub type RunResults = BTreeMap<String, JobResult>;

/// Stops a run from launching further jobs. Running jobs are left alone.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs every job of a matrix with fail-fast disabled.
pub struct Orchestrator {
    runner: JobRunner,
    max_parallel: Option<usize>,
    cancel: CancelSignal,
}

impl Orchestrator {
    pub fn new(runner: JobRunner) -> Self {
        Self {
            runner,
            max_parallel: None,
            cancel: CancelSignal::new(),
        }
    }

    /// Limit how many jobs run at once (0 = unlimited).
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = (max_parallel > 0).then_some(max_parallel);
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Expand `definition` and run all resulting jobs.
    ///
    /// Only configuration errors are returned as `Err`, and they are raised
    /// before any job starts. One job failing never stops another.
    pub async fn run(&self, definition: &MatrixDefinition) -> Result<RunResults, ConfigError> {
        let jobs = expand_matrix(definition)?;
        let digest = definition.digest();
        info!(
            matrix_digest = %&digest[..12],
            jobs = jobs.len(),
            "Starting build matrix"
        );
        Ok(self.run_jobs(jobs).await)
    }

    /// Run already-expanded jobs concurrently and wait for all of them.
    pub async fn run_jobs(&self, jobs: Vec<JobDescriptor>) -> RunResults {
        let permits = self.max_parallel.map(|n| Arc::new(Semaphore::new(n)));

        let handles = jobs.iter().cloned().map(|descriptor| {
            let runner = self.runner.clone();
            let cancel = self.cancel.clone();
            let permits = permits.clone();

            tokio::spawn(async move {
                let _permit = match permits {
                    Some(semaphore) => tokio::select! {
                        permit = semaphore.acquire_owned() => permit.ok(),
                        _ = cancel.cancelled() => None,
                    },
                    None => None,
                };

                if cancel.is_cancelled() {
                    warn!(triple = %descriptor.target(), "Run cancelled, job not launched");
                    return JobResult::cancelled(&descriptor);
                }
                runner.run_job(&descriptor).await
            })
        });

        let joined = join_all(handles).await;

        let mut results = RunResults::new();
        for (descriptor, joined) in jobs.iter().zip(joined) {
            let result = joined.unwrap_or_else(|e| {
                error!(triple = %descriptor.target(), error = %e, "Job task aborted");
                JobResult::aborted(descriptor, format!("job task aborted: {}", e))
            });
            results.insert(descriptor.target().to_string(), result);
        }

        let failed = results.values().filter(|r| !r.succeeded()).count();
        info!(
            jobs = results.len(),
            failed = failed,
            "Build matrix finished"
        );
        results
    }
}
