//! Unified test utilities for mpcopy tests and benchmarks

use async_trait::async_trait;
use mpcopy_engine::RunSettings;
use mpcopy_types::{
    RetryPolicy, ThreadCount, TransferExecutor, TransferOptions, TransferOutcome, WorkItem,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// A source root and an empty target root sharing a leaf name
pub struct SourceTree {
    dir: TempDir,
    /// Source root
    pub source: PathBuf,
    /// Target root
    pub target: PathBuf,
}

impl SourceTree {
    /// `<tmp>/src/<leaf>` and `<tmp>/dst/<leaf>`, both created
    pub fn new(leaf: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let source = dir.path().join("src").join(leaf);
        let target = dir.path().join("dst").join(leaf);
        fs::create_dir_all(&source).expect("Failed to create source root");
        fs::create_dir_all(&target).expect("Failed to create target root");
        Self {
            dir,
            source,
            target,
        }
    }

    /// Tree with one small file per relative path
    pub fn with_files(leaf: &str, files: &[&str]) -> Self {
        let tree = Self::new(leaf);
        for file in files {
            tree.write(file, file.as_bytes());
        }
        tree
    }

    /// Write `contents` at `relative` under the source root
    pub fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.source.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, contents).expect("Failed to write test file");
        path
    }

    /// Scratch directory holding both roots
    pub fn scratch(&self) -> &Path {
        self.dir.path()
    }

    /// Default queue location for this tree
    pub fn queue_file(&self) -> PathBuf {
        self.dir.path().join("mpcopy.queue")
    }

    /// Journal next to [`queue_file`](Self::queue_file)
    pub fn journal_file(&self) -> PathBuf {
        self.dir.path().join("mpcopy.queue.journal")
    }

    /// Every regular file under the target root, relative and sorted
    pub fn target_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(&self.target, &self.target, &mut files);
        files.sort();
        files
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_path_buf());
        }
    }
}

/// Run settings for `tree` with the given worker count
pub fn settings(tree: &SourceTree, threads: usize, execute: bool) -> RunSettings {
    RunSettings {
        source: tree.source.clone(),
        target: tree.target.clone(),
        threads: ThreadCount::new(threads).expect("valid thread count"),
        options: TransferOptions {
            dry_run: !execute,
            ..TransferOptions::default()
        },
        create_target: false,
        rebuild: false,
        retry: RetryPolicy::default(),
        queue_file: tree.queue_file(),
        compact_every: 1024,
    }
}

/// Backend that records calls and fails a fixed set of paths
#[derive(Default)]
pub struct ScriptedExecutor {
    failing: HashSet<PathBuf>,
    delay: Duration,
    calls: Mutex<Vec<PathBuf>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    overlaps: AtomicUsize,
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl ScriptedExecutor {
    /// Succeeds for every item
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every attempt for `paths`
    pub fn failing<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            failing: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sleep this long inside every transfer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Paths in call order
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Highest number of simultaneous transfers observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Times one path was handed out while already in flight
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferExecutor for ScriptedExecutor {
    async fn transfer(&self, item: &WorkItem, _options: &TransferOptions) -> TransferOutcome {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self
            .in_flight
            .lock()
            .expect("in-flight lock")
            .insert(item.relative_path.clone())
        {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls
            .lock()
            .expect("calls lock")
            .push(item.relative_path.clone());

        self.in_flight
            .lock()
            .expect("in-flight lock")
            .remove(&item.relative_path);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&item.relative_path) {
            TransferOutcome::Failure("scripted failure".to_string())
        } else {
            TransferOutcome::Success
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
