//! Durable work queue shared by all workers
//!
//! In-memory state sits behind one lock and serves `dequeue`. Every durable
//! change goes through the journal lock first, so exactly one writer touches
//! the files at a time. Lock order is always journal, then state.

use super::persist::{atomic_write, read_optional, sibling, Journal};
use super::record::{
    parse_journal, parse_snapshot, render_snapshot, to_line, ItemRecord, JournalRecord,
    QueueHeader, Snapshot,
};
use mpcopy_types::{is_contained_path, Error, ItemStatus, Result, RetryPolicy, WorkItem};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

/// Queue behaviour knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Journal records between snapshot rewrites
    pub compact_every: usize,
    /// Retry and quarantine policy
    pub retry: RetryPolicy,
    /// Keep all state in memory and never write
    pub read_only: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            compact_every: 1024,
            retry: RetryPolicy::default(),
            read_only: false,
        }
    }
}

/// Counts of outstanding items by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Waiting for dispatch
    pub pending: u64,
    /// Currently held by a worker
    pub in_flight: u64,
    /// Failed this run and not retried again
    pub failed: u64,
    /// Reached the attempt limit
    pub quarantined: u64,
}

impl QueueCounts {
    /// All items still recorded in the queue
    pub fn total(&self) -> u64 {
        self.pending + self.in_flight + self.failed + self.quarantined
    }
}

/// What [`QueueStore::load`] found on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedQueue {
    /// Snapshot header, if the file had one
    pub header: Option<QueueHeader>,
    /// Outstanding items in queue order
    pub items: Vec<WorkItem>,
}

impl LoadedQueue {
    /// No resume state: the queue must be built
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// A previous run completed every item
    pub fn is_drained(&self) -> bool {
        self.items.is_empty() && self.header.as_ref().is_some_and(|h| h.drained)
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    attempts: u32,
    status: ItemStatus,
    failures_this_run: u32,
    quarantined: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    header: Option<QueueHeader>,
    entries: HashMap<PathBuf, Entry>,
    ready: VecDeque<PathBuf>,
    next_seq: u64,
    in_flight: usize,
    loaded: bool,
}

impl QueueState {
    fn insert(&mut self, path: PathBuf, attempts: u32, retry: &RetryPolicy) -> bool {
        if self.entries.contains_key(&path) {
            return false;
        }
        let quarantined = retry.is_quarantined(attempts);
        self.entries.insert(
            path.clone(),
            Entry {
                seq: self.next_seq,
                attempts,
                status: ItemStatus::Pending,
                failures_this_run: 0,
                quarantined,
            },
        );
        self.next_seq += 1;
        if !quarantined {
            self.ready.push_back(path);
        }
        true
    }

    fn ordered(&self) -> Vec<(&PathBuf, &Entry)> {
        let mut ordered: Vec<_> = self.entries.iter().collect();
        ordered.sort_by_key(|(_, entry)| entry.seq);
        ordered
    }

    fn records(&self) -> Vec<ItemRecord> {
        self.ordered()
            .into_iter()
            .map(|(path, entry)| ItemRecord {
                path: path.clone(),
                attempts: entry.attempts,
            })
            .collect()
    }
}

/// Crash-consistent queue of pending work items
#[derive(Debug)]
pub struct QueueStore {
    path: PathBuf,
    options: QueueOptions,
    state: Mutex<QueueState>,
    journal: Option<Mutex<Journal>>,
    changed: Notify,
    stopping: AtomicBool,
    aborted: AtomicBool,
}

impl QueueStore {
    /// Queue backed by `path`; nothing is read until [`load`](Self::load)
    pub fn open<P: Into<PathBuf>>(path: P, options: QueueOptions) -> Self {
        let path = path.into();
        let journal = (!options.read_only).then(|| Mutex::new(Journal::new(sibling(&path, ".journal"))));

        Self {
            path,
            options,
            state: Mutex::new(QueueState::default()),
            journal,
            changed: Notify::new(),
            stopping: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        }
    }

    /// Snapshot file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Journal file location
    pub fn journal_path(&self) -> PathBuf {
        sibling(&self.path, ".journal")
    }

    /// Whether this queue never writes
    pub fn is_read_only(&self) -> bool {
        self.journal.is_none()
    }

    /// Read durable state, replaying the journal over the snapshot.
    ///
    /// Returns an empty item list when the files are absent or empty.
    pub async fn load(&self) -> Result<LoadedQueue> {
        let snapshot = match read_optional(&self.path).await? {
            Some(text) => parse_snapshot(&self.path, &text)?,
            None => Snapshot::default(),
        };

        let journal_path = self.journal_path();
        let (records, torn) = match read_optional(&journal_path).await? {
            Some(text) => parse_journal(&journal_path, &text)?,
            None => (Vec::new(), false),
        };
        if torn {
            warn!(journal = %journal_path.display(), "ignoring torn final journal record");
        }
        let replayed = !records.is_empty() || torn;

        let loaded = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            *state = QueueState::default();
            state.header = snapshot.header;
            let had_items = !snapshot.items.is_empty();

            for record in snapshot.items {
                let path = record.path.clone();
                if !state.insert(record.path, record.attempts, &self.options.retry) {
                    warn!(path = %path.display(), "dropping duplicate queue record");
                }
            }

            for record in records {
                match record {
                    JournalRecord::Done { path } => {
                        state.entries.remove(&path);
                    }
                    JournalRecord::Fail { path, attempts } => {
                        if let Some(entry) = state.entries.get_mut(&path) {
                            entry.attempts = entry.attempts.max(attempts);
                            entry.quarantined = self.options.retry.is_quarantined(entry.attempts);
                        }
                    }
                }
            }

            // Every recorded item completed before the previous run could write its marker
            if had_items && state.entries.is_empty() {
                if let Some(header) = state.header.as_mut() {
                    header.drained = true;
                }
            }

            let ready: VecDeque<PathBuf> = state
                .ordered()
                .into_iter()
                .filter(|(_, entry)| !entry.quarantined)
                .map(|(path, _)| path.clone())
                .collect();
            state.ready = ready;
            state.loaded = true;

            LoadedQueue {
                header: state.header.clone(),
                items: state
                    .ordered()
                    .into_iter()
                    .map(|(path, entry)| WorkItem::new(path.clone()).with_attempts(entry.attempts))
                    .collect(),
            }
        };

        if replayed {
            // Fold the journal away so later appends never follow a torn line
            self.compact().await?;
        }

        debug!(
            queue = %self.path.display(),
            items = loaded.items.len(),
            drained = loaded.is_drained(),
            "queue loaded"
        );
        Ok(loaded)
    }

    /// Persist the full item set. Only allowed while the loaded queue is empty.
    ///
    /// Duplicate paths are dropped. Returns the number of items stored.
    pub async fn initialize<I>(&self, header: QueueHeader, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut journal = match &self.journal {
            Some(journal) => Some(journal.lock().await),
            None => None,
        };

        let items: Vec<PathBuf> = items.into_iter().collect();
        if let Some(bad) = items.iter().find(|path| !is_contained_path(path)) {
            return Err(Error::validation(format!(
                "queue item {} is not relative to the transfer roots",
                bad.display()
            )));
        }

        let count = {
            let mut state = self.state.lock().await;
            if !state.loaded {
                return Err(Error::other("queue must be loaded before it is initialized"));
            }
            if !state.entries.is_empty() {
                return Err(Error::QueueAlreadyInitialized {
                    path: self.path.clone(),
                });
            }

            *state = QueueState {
                header: Some(header),
                loaded: true,
                ..QueueState::default()
            };
            let mut seen = HashSet::new();
            for path in items {
                if seen.insert(path.clone()) {
                    state.insert(path, 0, &self.options.retry);
                } else {
                    debug!(path = %path.display(), "duplicate path ignored at build");
                }
            }
            state.entries.len()
        };

        if let Some(journal) = journal.as_mut() {
            self.compact_locked(journal).await?;
        }

        info!(queue = %self.path.display(), items = count, "queue initialized");
        Ok(count)
    }

    /// Take one pending item for processing.
    ///
    /// Waits while other items are in flight because a failed one may be
    /// re-queued. Returns `None` once nothing is pending or in flight, or after
    /// [`stop`](Self::stop) or [`abort`](Self::abort).
    pub async fn dequeue(&self) -> Option<WorkItem> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut guard = self.state.lock().await;
                if self.stopping.load(Ordering::SeqCst) || self.aborted.load(Ordering::SeqCst) {
                    return None;
                }

                let state = &mut *guard;
                while let Some(path) = state.ready.pop_front() {
                    let Some(entry) = state.entries.get_mut(&path) else {
                        continue;
                    };
                    if entry.status != ItemStatus::Pending {
                        continue;
                    }
                    entry.status = ItemStatus::InProgress;
                    state.in_flight += 1;
                    return Some(WorkItem {
                        relative_path: path,
                        status: ItemStatus::InProgress,
                        attempts: entry.attempts,
                    });
                }

                if state.in_flight == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Durably remove a completed item.
    ///
    /// The journal record is fsynced before memory changes; a crash before
    /// that leaves the item pending for the next run.
    pub async fn mark_done(&self, item: &WorkItem) -> Result<()> {
        let record = JournalRecord::Done {
            path: item.relative_path.clone(),
        };

        match &self.journal {
            Some(journal) => {
                let mut journal = journal.lock().await;
                self.append_or_abort(&mut journal, &record).await?;
                self.apply_done(item).await;
                if journal.records() >= self.options.compact_every {
                    self.compact_locked(&mut journal).await?;
                }
            }
            None => self.apply_done(item).await,
        }
        Ok(())
    }

    /// Durably record a failed attempt and return the item to the queue.
    ///
    /// Returns `true` when the item was re-queued for this run.
    pub async fn mark_failed(&self, item: &WorkItem) -> Result<bool> {
        let attempts = item.attempts.saturating_add(1);
        let record = JournalRecord::Fail {
            path: item.relative_path.clone(),
            attempts,
        };

        let requeued = match &self.journal {
            Some(journal) => {
                let mut journal = journal.lock().await;
                self.append_or_abort(&mut journal, &record).await?;
                let requeued = self.apply_failed(item, attempts).await;
                if journal.records() >= self.options.compact_every {
                    self.compact_locked(&mut journal).await?;
                }
                requeued
            }
            None => self.apply_failed(item, attempts).await,
        };
        Ok(requeued)
    }

    /// Rewrite the snapshot from memory and drop the journal
    pub async fn compact(&self) -> Result<()> {
        if let Some(journal) = &self.journal {
            let mut journal = journal.lock().await;
            self.compact_locked(&mut journal).await?;
        }
        Ok(())
    }

    /// Final compaction; writes the drained marker when nothing is left
    pub async fn finish(&self) -> Result<QueueCounts> {
        if let Some(journal) = &self.journal {
            let mut journal = journal.lock().await;
            {
                let mut state = self.state.lock().await;
                if state.entries.is_empty() {
                    if let Some(header) = state.header.as_mut() {
                        header.drained = true;
                    }
                }
            }
            self.compact_locked(&mut journal).await?;
        }
        Ok(self.counts().await)
    }

    /// Attach a header to a queue that was loaded without one
    pub async fn adopt_header(&self, header: QueueHeader) {
        let mut state = self.state.lock().await;
        if state.header.is_none() {
            state.header = Some(header);
        }
    }

    /// Current snapshot header
    pub async fn header(&self) -> Option<QueueHeader> {
        self.state.lock().await.header.clone()
    }

    /// Outstanding items by state
    pub async fn counts(&self) -> QueueCounts {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for entry in state.entries.values() {
            match entry.status {
                ItemStatus::InProgress => counts.in_flight += 1,
                _ if entry.quarantined => counts.quarantined += 1,
                ItemStatus::Failed => counts.failed += 1,
                ItemStatus::Pending | ItemStatus::Done => counts.pending += 1,
            }
        }
        counts
    }

    /// Stop handing out items; in-flight items can still be marked
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Whether [`stop`](Self::stop) was called
    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Stop handing out items after an unrecoverable error
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    async fn apply_done(&self, item: &WorkItem) {
        {
            let mut state = self.state.lock().await;
            if state.entries.remove(&item.relative_path).is_some() {
                state.in_flight = state.in_flight.saturating_sub(1);
            }
        }
        self.changed.notify_waiters();
    }

    async fn apply_failed(&self, item: &WorkItem, attempts: u32) -> bool {
        let requeued = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let Some(entry) = state.entries.get_mut(&item.relative_path) else {
                return false;
            };

            entry.attempts = attempts;
            entry.failures_this_run += 1;
            entry.quarantined = self.options.retry.is_quarantined(attempts);
            let requeued = self
                .options
                .retry
                .allows_in_run_retry(entry.failures_this_run, attempts);
            if requeued {
                entry.status = ItemStatus::Pending;
                state.ready.push_back(item.relative_path.clone());
            } else {
                entry.status = ItemStatus::Failed;
            }
            if entry.quarantined {
                warn!(path = %item, attempts, "item quarantined after repeated failures");
            }
            state.in_flight = state.in_flight.saturating_sub(1);
            requeued
        };
        self.changed.notify_waiters();
        requeued
    }

    // Aborts before the journal lock is released so no waiting writer or
    // dequeue can slip in behind a failed record.
    async fn append_or_abort(&self, journal: &mut Journal, record: &JournalRecord) -> Result<()> {
        let result = match to_line(record) {
            Ok(line) => journal.append(&line).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!(queue = %self.path.display(), error = %e, "journal write failed; dispatch stopped");
            self.abort();
        }
        result
    }

    async fn compact_locked(&self, journal: &mut Journal) -> Result<()> {
        let text = {
            let state = self.state.lock().await;
            render_snapshot(state.header.as_ref(), &state.records())?
        };
        atomic_write(&self.path, text.as_bytes()).await?;
        journal.reset().await?;
        debug!(queue = %self.path.display(), "queue snapshot rewritten");
        Ok(())
    }
}
