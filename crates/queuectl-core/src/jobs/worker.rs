//! The worker execution loop: claim, supervise, record.
//!
//! One worker runs one job at a time; parallelism comes from running
//! multiple worker processes against the same store. The loop never holds
//! a store transaction across a subprocess: it claims, runs, and then
//! records the outcome.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;
use crate::jobs::{backoff, executor, Job, JobOutcome};
use crate::store::Store;

/// How long an idle worker sleeps before polling the store again.
pub const IDLE_POLL: Duration = Duration::from_millis(500);

/// A single-job-at-a-time execution loop.
pub struct Worker {
    id: u32,
    store: Store,
    settings: WorkerSettings,
    shutdown: CancellationToken,
}

impl Worker {
    /// Create a worker, snapshotting the config keys it consumes
    /// (`backoff_base`, `job_timeout`).
    pub async fn new(id: u32, store: Store, shutdown: CancellationToken) -> Self {
        let settings = store.worker_settings().await;
        Self {
            id,
            store,
            settings,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled. An in-flight job always
    /// runs to completion and has its outcome recorded before the loop
    /// exits.
    pub async fn run(&self) {
        info!(worker = self.id, pid = std::process::id(), "worker started");

        while !self.shutdown.is_cancelled() {
            let job = match self.store.claim().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    self.idle().await;
                    continue;
                }
                Err(err) => {
                    // Contention and transient store errors collapse to
                    // "no job"; the next iteration retries.
                    if err.is_busy() {
                        debug!(worker = self.id, "store busy during claim");
                    } else {
                        warn!(worker = self.id, "claim failed: {err}");
                    }
                    self.idle().await;
                    continue;
                }
            };
            self.process(job).await;
        }

        info!(worker = self.id, "worker exiting");
    }

    async fn idle(&self) {
        tokio::select! {
            _ = tokio::time::sleep(IDLE_POLL) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    async fn process(&self, job: Job) {
        let timeout =
            Duration::from_secs(job.effective_timeout(self.settings.job_timeout_secs));
        info!(
            worker = self.id,
            job = %job.id,
            attempts = job.attempts,
            timeout_secs = timeout.as_secs(),
            "picked job: {}",
            job.command
        );

        let output = executor::run_with_deadline(&job.command, timeout).await;
        let attempts = job.attempts + 1;

        if output.success() {
            info!(
                worker = self.id,
                job = %job.id,
                "job completed (exit {}) in {:.2}s",
                output.exit_code,
                output.duration
            );
        } else if output.timed_out {
            warn!(
                worker = self.id,
                job = %job.id,
                "job timed out after {}s",
                timeout.as_secs()
            );
        } else {
            warn!(worker = self.id, job = %job.id, "job failed (exit {})", output.exit_code);
        }

        let next_delay = if output.success() || attempts >= job.max_retries {
            0
        } else {
            backoff::retry_delay(self.settings.backoff_base, attempts)
        };

        let outcome = JobOutcome {
            success: output.success(),
            attempts,
            max_retries: job.max_retries,
            error: output.error_label(),
            stdout: Some(output.stdout),
            stderr: Some(output.stderr),
            duration: output.duration,
            timed_out: output.timed_out,
            next_delay,
        };

        if !outcome.success {
            if outcome.is_exhausted() {
                warn!(
                    worker = self.id,
                    job = %job.id,
                    "job moved to the dead-letter queue after {attempts} attempts"
                );
            } else {
                info!(
                    worker = self.id,
                    job = %job.id,
                    "will retry after {next_delay}s (attempt {attempts}/{})",
                    job.max_retries
                );
            }
        }

        // A failed write leaves the job in `processing`; the worker keeps
        // serving the queue.
        if let Err(err) = self.store.finish(&job.id, &outcome).await {
            error!(worker = self.id, job = %job.id, "failed to record outcome: {err}");
        }
    }
}
