//! Bounded worker pool that drains a [`QueueStore`]

use crate::queue::QueueStore;
use mpcopy_types::{
    Error, ProgressReporter, Result, RunSummary, ThreadCount, TransferExecutor, TransferOptions,
    TransferOutcome,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Runs `threads` workers against one queue until it is exhausted
pub struct Dispatcher {
    queue: Arc<QueueStore>,
    executor: Arc<dyn TransferExecutor>,
    reporter: Arc<dyn ProgressReporter>,
    options: TransferOptions,
    threads: ThreadCount,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        queue: Arc<QueueStore>,
        executor: Arc<dyn TransferExecutor>,
        reporter: Arc<dyn ProgressReporter>,
        options: TransferOptions,
        threads: ThreadCount,
    ) -> Self {
        Self {
            queue,
            executor,
            reporter,
            options,
            threads,
        }
    }

    /// Run all workers to completion.
    ///
    /// Per-item transfer failures are counted, never returned. The first
    /// queue persistence error stops every worker and is returned.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let counts = self.queue.counts().await;
        self.reporter.on_start(counts.pending);

        info!(
            workers = self.threads.get(),
            pending = counts.pending,
            backend = self.executor.name(),
            dry_run = self.options.dry_run,
            "dispatch started"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.threads.get() {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&self.queue),
                Arc::clone(&self.executor),
                Arc::clone(&self.reporter),
                self.options,
            ));
        }

        let mut summary = RunSummary::new();
        let mut first_error: Option<Error> = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined
                .map_err(|e| Error::other(format!("worker task failed: {}", e)))
                .and_then(|worker| worker);
            match result {
                Ok(worker_summary) => summary.merge(&worker_summary),
                Err(e) => {
                    if first_error.is_none() {
                        error!(error = %e, "stopping dispatch");
                        self.queue.abort();
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let counts = self.queue.counts().await;
        summary.pending = counts.pending + counts.in_flight;
        summary.failed = counts.failed;
        summary.quarantined = counts.quarantined;
        summary.interrupted = self.queue.is_stopped();
        summary.duration = started.elapsed();

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            pending = summary.pending,
            quarantined = summary.quarantined,
            "dispatch finished"
        );
        Ok(summary)
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<QueueStore>,
    executor: Arc<dyn TransferExecutor>,
    reporter: Arc<dyn ProgressReporter>,
    options: TransferOptions,
) -> Result<RunSummary> {
    let mut stats = RunSummary::new();

    while let Some(item) = queue.dequeue().await {
        debug!(worker = worker_id, path = %item, attempts = item.attempts, "transfer started");
        let outcome = executor.transfer(&item, &options).await;

        match &outcome {
            TransferOutcome::Success => {
                queue.mark_done(&item).await?;
                stats.succeeded += 1;
                debug!(worker = worker_id, path = %item, "transfer done");
            }
            TransferOutcome::Failure(cause) => {
                let requeued = queue.mark_failed(&item).await?;
                stats.failed_attempts += 1;
                warn!(
                    worker = worker_id,
                    path = %item,
                    attempts = item.attempts + 1,
                    requeued,
                    cause = %cause,
                    "transfer failed"
                );
            }
        }

        reporter.on_item_finished(&item, &outcome);
    }

    debug!(worker = worker_id, "worker exiting");
    Ok(stats)
}
