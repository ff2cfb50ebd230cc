//! Run lifecycle: validate roots, load or build the queue, dispatch, finish
//!
//! The phases only move forward:
//! `Idle -> Building -> Dispatching -> Drained`, with `Building` skipped when
//! the queue file already holds resume state.

use crate::dispatcher::Dispatcher;
use crate::enumerator::PathEnumerator;
use crate::queue::{QueueHeader, QueueOptions, QueueStore};
use chrono::Local;
use mpcopy_config::Config;
use mpcopy_types::{
    Error, NullProgress, ProgressReporter, Result, RetryPolicy, RunSummary, ThreadCount,
    TransferExecutor, TransferOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started
    Idle,
    /// Enumerating the source tree into a fresh queue
    Building,
    /// Workers are draining the queue
    Dispatching,
    /// Run finished; terminal
    Drained,
}

/// Everything one run needs besides the transfer backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Source root
    pub source: PathBuf,
    /// Target root
    pub target: PathBuf,
    /// Worker count
    pub threads: ThreadCount,
    /// Options passed to every transfer
    pub options: TransferOptions,
    /// Create a missing target root instead of failing
    pub create_target: bool,
    /// Re-enumerate when the previous queue was drained
    pub rebuild: bool,
    /// Retry and quarantine policy
    pub retry: RetryPolicy,
    /// Queue snapshot path
    pub queue_file: PathBuf,
    /// Journal records between snapshot rewrites
    pub compact_every: usize,
}

impl RunSettings {
    /// Settings for `source -> target` taken from a loaded configuration
    pub fn from_config<S: Into<PathBuf>, T: Into<PathBuf>>(
        source: S,
        target: T,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            source: source.into(),
            target: target.into(),
            threads: config.transfer.threads,
            options: config.transfer.transfer_options(),
            create_target: config.transfer.create_target,
            rebuild: false,
            retry: config.transfer.retry_policy()?,
            queue_file: config.queue.queue_file.clone(),
            compact_every: config.queue.compact_every,
        })
    }

    fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            compact_every: self.compact_every,
            retry: self.retry,
            // a simulation must never consume durable queue entries
            read_only: self.options.dry_run,
        }
    }
}

/// Source and target roots after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    /// Canonical source root
    pub source: PathBuf,
    /// Canonical target root, or its absolute form when not created yet
    pub target: PathBuf,
}

/// Check both roots exist and share a leaf name.
///
/// A missing target is created when `create_target` is set and
/// `mutate` is true; in a dry run it is only assumed.
pub async fn validate_roots(
    source: &Path,
    target: &Path,
    create_target: bool,
    mutate: bool,
) -> Result<Roots> {
    if !tokio::fs::metadata(source).await.is_ok_and(|m| m.is_dir()) {
        return Err(Error::SourcePathMissing {
            path: source.to_path_buf(),
        });
    }
    let source_root = tokio::fs::canonicalize(source).await?;

    let target_exists = tokio::fs::metadata(target).await.is_ok_and(|m| m.is_dir());
    if !target_exists {
        if !create_target {
            return Err(Error::TargetPathMissing {
                path: target.to_path_buf(),
            });
        }
        if mutate {
            tokio::fs::create_dir_all(target).await?;
            info!(target = %target.display(), "created target root");
        }
    }
    let target_root = if tokio::fs::metadata(target).await.is_ok() {
        tokio::fs::canonicalize(target).await?
    } else {
        absolute(target)?
    };

    if source_root.file_name() != target_root.file_name() {
        return Err(Error::RootMismatch {
            source_root,
            target_root,
        });
    }

    Ok(Roots {
        source: source_root,
        target: target_root,
    })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Stops a running [`Orchestrator`] from handing out more items
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    queue: Arc<QueueStore>,
}

impl ShutdownHandle {
    /// Let in-flight transfers finish, dispatch nothing new
    pub fn shutdown(&self) {
        info!("shutdown requested; waiting for in-flight transfers");
        self.queue.stop();
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shutdown(&self) -> bool {
        self.queue.is_stopped()
    }
}

/// Drives one resumable copy run
pub struct Orchestrator {
    settings: RunSettings,
    queue: Arc<QueueStore>,
    executor: Arc<dyn TransferExecutor>,
    reporter: Arc<dyn ProgressReporter>,
    phase: Arc<RwLock<Phase>>,
}

impl Orchestrator {
    /// Orchestrator using `executor` for every item
    pub fn new(settings: RunSettings, executor: Arc<dyn TransferExecutor>) -> Self {
        let queue = Arc::new(QueueStore::open(
            settings.queue_file.clone(),
            settings.queue_options(),
        ));
        Self {
            settings,
            queue,
            executor,
            reporter: Arc::new(NullProgress),
            phase: Arc::new(RwLock::new(Phase::Idle)),
        }
    }

    /// Report progress to `reporter`
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Handle for stopping the run from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            queue: Arc::clone(&self.queue),
        }
    }

    /// The queue this run drains
    pub fn queue(&self) -> &Arc<QueueStore> {
        &self.queue
    }

    /// Current phase
    pub async fn phase(&self) -> Phase {
        *self.phase.read().await
    }

    async fn enter(&self, phase: Phase) {
        let mut current = self.phase.write().await;
        debug!(from = ?*current, to = ?phase, "phase change");
        *current = phase;
    }

    /// Run to completion and return the summary.
    ///
    /// Root and queue errors are returned before any transfer starts. Per-item
    /// failures only show up in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let settings = &self.settings;
        info!(
            "Start: {} source={} target={} execute={}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            settings.source.display(),
            settings.target.display(),
            !settings.options.dry_run
        );

        let roots = validate_roots(
            &settings.source,
            &settings.target,
            settings.create_target,
            settings.options.mutates(),
        )
        .await?;

        let loaded = self.queue.load().await?;
        if let Some(header) = &loaded.header {
            if !header.matches_roots(&roots.source, &roots.target) {
                return Err(Error::validation(format!(
                    "queue {} was built for {} -> {}, not {} -> {}",
                    self.queue.path().display(),
                    header.source.display(),
                    header.target.display(),
                    roots.source.display(),
                    roots.target.display()
                )));
            }
        }

        if settings.rebuild && !loaded.is_empty() {
            return Err(Error::validation(format!(
                "queue {} still holds {} items; finish or remove it before rebuilding",
                self.queue.path().display(),
                loaded.items.len()
            )));
        }

        if loaded.is_drained() && !settings.rebuild {
            info!(queue = %self.queue.path().display(), "queue already drained; nothing to do");
            self.enter(Phase::Drained).await;
            let mut summary = RunSummary::new();
            summary.duration = started.elapsed();
            self.reporter.on_finish(&summary);
            return Ok(summary);
        }

        if loaded.is_empty() {
            self.build(&roots).await?;
        } else {
            info!(
                queue = %self.queue.path().display(),
                items = loaded.items.len(),
                "resuming from queue"
            );
            if loaded.header.is_none() {
                self.queue
                    .adopt_header(QueueHeader::new(&roots.source, &roots.target))
                    .await;
            }
        }

        self.enter(Phase::Dispatching).await;
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.executor),
            Arc::clone(&self.reporter),
            settings.options,
            settings.threads,
        );
        let mut summary = dispatcher.run().await?;

        let counts = self.queue.finish().await?;
        summary.pending = counts.pending + counts.in_flight;
        summary.failed = counts.failed;
        summary.quarantined = counts.quarantined;
        summary.duration = started.elapsed();
        self.enter(Phase::Drained).await;

        if summary.interrupted {
            warn!(remaining = summary.remaining(), "run interrupted");
        }
        self.reporter.on_finish(&summary);
        info!(
            "End: {} succeeded={} failed={} pending={} quarantined={}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            summary.succeeded,
            summary.failed,
            summary.pending,
            summary.quarantined
        );
        Ok(summary)
    }

    async fn build(&self, roots: &Roots) -> Result<()> {
        self.enter(Phase::Building).await;
        let enumerator = PathEnumerator::new(&roots.source);
        let (paths, stats) = tokio::task::spawn_blocking(move || enumerator.collect())
            .await
            .map_err(|e| Error::other(format!("enumeration task failed: {}", e)))??;

        let stored = self
            .queue
            .initialize(QueueHeader::new(&roots.source, &roots.target), paths)
            .await?;
        info!(
            "Listed: {} files={} skipped_special={} skipped_non_utf8={}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            stored,
            stats.skipped_special,
            stats.skipped_non_utf8
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mpcopy_types::{TransferOutcome, WorkItem};
    use std::fs;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recording {
        calls: StdMutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl TransferExecutor for Recording {
        async fn transfer(&self, item: &WorkItem, _options: &TransferOptions) -> TransferOutcome {
            self.calls.lock().unwrap().push(item.relative_path.clone());
            TransferOutcome::Success
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    struct Fixture {
        dir: TempDir,
        source: PathBuf,
        target: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src/photos");
        let target = dir.path().join("dst/photos");
        fs::create_dir_all(source.join("2019")).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(source.join("a.txt"), b"a").unwrap();
        fs::write(source.join("2019/b.txt"), b"b").unwrap();
        Fixture { dir, source, target }
    }

    fn settings(fx: &Fixture, execute: bool) -> RunSettings {
        RunSettings {
            source: fx.source.clone(),
            target: fx.target.clone(),
            threads: ThreadCount::new(2).unwrap(),
            options: TransferOptions {
                dry_run: !execute,
                ..TransferOptions::default()
            },
            create_target: false,
            rebuild: false,
            retry: RetryPolicy::default(),
            queue_file: fx.dir.path().join("mpcopy.queue"),
            compact_every: 1024,
        }
    }

    #[tokio::test]
    async fn test_validate_roots_missing_source() {
        let fx = fixture();
        let err = validate_roots(&fx.dir.path().join("nope"), &fx.target, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourcePathMissing { .. }));
        assert_eq!(err.condition(), "SOURCE_DOES_NOT_EXIST");
    }

    #[tokio::test]
    async fn test_validate_roots_missing_target() {
        let fx = fixture();
        let missing = fx.dir.path().join("other/photos");
        let err = validate_roots(&fx.source, &missing, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TargetPathMissing { .. }));
        assert_eq!(err.condition(), "TARGET_PATH_DOES_NOT_EXIST");
    }

    #[tokio::test]
    async fn test_validate_roots_creates_target_only_when_mutating() {
        let fx = fixture();
        let missing = fx.dir.path().join("other/photos");

        let roots = validate_roots(&fx.source, &missing, true, false).await.unwrap();
        assert!(!missing.exists());
        assert_eq!(roots.target.file_name(), missing.file_name());

        validate_roots(&fx.source, &missing, true, true).await.unwrap();
        assert!(missing.is_dir());
    }

    #[tokio::test]
    async fn test_validate_roots_leaf_mismatch() {
        let fx = fixture();
        let other = fx.dir.path().join("dst/music");
        fs::create_dir_all(&other).unwrap();
        let err = validate_roots(&fx.source, &other, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RootMismatch { .. }));
    }

    #[tokio::test]
    async fn test_run_builds_then_drains() {
        let fx = fixture();
        let executor = Arc::new(Recording::default());
        let orchestrator = Orchestrator::new(settings(&fx, true), executor.clone());
        assert_eq!(orchestrator.phase().await, Phase::Idle);

        let summary = orchestrator.run().await.unwrap();

        assert_eq!(summary.succeeded, 2);
        assert!(summary.is_drained());
        assert_eq!(orchestrator.phase().await, Phase::Drained);
        assert_eq!(executor.calls.lock().unwrap().len(), 2);

        let header = orchestrator.queue().header().await.unwrap();
        assert!(header.drained);
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let fx = fixture();
        Orchestrator::new(settings(&fx, true), Arc::new(Recording::default()))
            .run()
            .await
            .unwrap();

        let executor = Arc::new(Recording::default());
        let summary = Orchestrator::new(settings(&fx, true), executor.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 0);
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_after_drain_re_enumerates() {
        let fx = fixture();
        Orchestrator::new(settings(&fx, true), Arc::new(Recording::default()))
            .run()
            .await
            .unwrap();
        fs::write(fx.source.join("c.txt"), b"c").unwrap();

        let mut rebuild = settings(&fx, true);
        rebuild.rebuild = true;
        let executor = Arc::new(Recording::default());
        let summary = Orchestrator::new(rebuild, executor.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 3);
    }

    #[tokio::test]
    async fn test_dry_run_writes_no_queue() {
        let fx = fixture();
        let queue_file = fx.dir.path().join("mpcopy.queue");

        let summary = Orchestrator::new(settings(&fx, false), Arc::new(Recording::default()))
            .run()
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert!(!queue_file.exists());
    }

    #[tokio::test]
    async fn test_resume_against_other_roots_is_rejected() {
        let fx = fixture();
        let queue_file = fx.dir.path().join("mpcopy.queue");
        let store = QueueStore::open(&queue_file, QueueOptions::default());
        store.load().await.unwrap();
        store
            .initialize(
                QueueHeader::new("/elsewhere/photos", "/backup/photos"),
                [PathBuf::from("a.txt")],
            )
            .await
            .unwrap();

        let err = Orchestrator::new(settings(&fx, true), Arc::new(Recording::default()))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_before_dispatch_leaves_queue_pending() {
        let fx = fixture();
        let executor = Arc::new(Recording::default());
        let orchestrator = Orchestrator::new(settings(&fx, true), executor.clone());
        orchestrator.shutdown_handle().shutdown();

        let summary = orchestrator.run().await.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.pending, 2);
        assert!(executor.calls.lock().unwrap().is_empty());
    }
}
