//! Core data types for mpcopy
//!
//! This module provides the unit of work, the options handed to a transfer
//! backend, per-item outcomes and the aggregate run summary.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Lifecycle state of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting to be dispatched
    #[default]
    Pending,
    /// Handed to a worker
    InProgress,
    /// Transferred successfully and removed from the queue
    Done,
    /// Last attempt failed; still in the queue
    Failed,
}

impl ItemStatus {
    /// Whether the item still needs work
    pub fn is_outstanding(self) -> bool {
        !matches!(self, Self::Done)
    }
}

/// One file transfer job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Path relative to both the source and the target root
    pub relative_path: PathBuf,
    /// Transient status
    pub status: ItemStatus,
    /// Number of failed dispatch attempts recorded so far
    pub attempts: u32,
}

impl WorkItem {
    /// Create a new pending item with no recorded attempts
    pub fn new<P: Into<PathBuf>>(relative_path: P) -> Self {
        Self {
            relative_path: relative_path.into(),
            status: ItemStatus::Pending,
            attempts: 0,
        }
    }

    /// Set the recorded attempt count
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Whether the relative path stays below whatever root it is joined to
    pub fn is_contained(&self) -> bool {
        is_contained_path(&self.relative_path)
    }

    /// Absolute path of this item below `root`
    ///
    /// Fails for paths that would leave `root`.
    pub fn resolve(&self, root: &Path) -> Result<PathBuf> {
        if !self.is_contained() {
            return Err(Error::transfer(
                &self.relative_path,
                "path is not relative to the transfer roots",
            ));
        }
        Ok(root.join(&self.relative_path))
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative_path.display())
    }
}

/// A non-empty path made only of normal components.
///
/// Absolute paths, drive prefixes, `.` and `..` are all rejected.
pub fn is_contained_path(path: &Path) -> bool {
    let mut components = path.components().peekable();
    components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
}

/// Change-detection strategy used by the transfer primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDetection {
    /// Full content comparison
    #[default]
    Checksum,
    /// Size and modification time comparison
    Fast,
}

/// Options passed to every transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Simulate only; never mutate source or target
    pub dry_run: bool,
    /// Remove the source after a confirmed transfer
    pub move_source: bool,
    /// Change-detection mode
    pub detection: ChangeDetection,
}

impl TransferOptions {
    /// Whether this transfer is allowed to touch the filesystem
    pub fn mutates(&self) -> bool {
        !self.dry_run
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            move_source: false,
            detection: ChangeDetection::Checksum,
        }
    }
}

/// Result of one transfer invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The item is in place on the target
    Success,
    /// The primitive reported failure with a cause
    Failure(String),
}

impl TransferOutcome {
    /// Check if the transfer succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Aggregate counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Items transferred and durably removed from the queue
    pub succeeded: u64,
    /// Items whose last attempt in this run failed
    pub failed: u64,
    /// Items never dispatched in this run
    pub pending: u64,
    /// Items held back because they reached the attempt limit
    pub quarantined: u64,
    /// Failed transfer attempts, including ones retried successfully
    pub failed_attempts: u64,
    /// Whether the run stopped early on interrupt
    pub interrupted: bool,
    /// Wall-clock duration of the dispatch phase
    pub duration: Duration,
}

impl RunSummary {
    /// Create a new empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Items still recorded in the queue after the run
    pub fn remaining(&self) -> u64 {
        self.failed + self.pending + self.quarantined
    }

    /// Whether the queue drained completely
    pub fn is_drained(&self) -> bool {
        self.remaining() == 0 && !self.interrupted
    }

    /// [`Error::Interrupted`] when a shutdown cut the run short
    pub fn interruption(&self) -> Option<Error> {
        self.interrupted.then_some(Error::Interrupted)
    }

    /// Merge counts from another summary
    pub fn merge(&mut self, other: &RunSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.pending += other.pending;
        self.quarantined += other.quarantined;
        self.failed_attempts += other.failed_attempts;
        self.interrupted |= other.interrupted;
        self.duration = self.duration.max(other.duration);
    }
}
