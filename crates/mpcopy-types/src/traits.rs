//! Core traits for mpcopy operations
//!
//! The engine only talks to the byte-copy primitive and to the operator
//! through these seams.

use crate::{RunSummary, TransferOptions, TransferOutcome, WorkItem};
use async_trait::async_trait;

/// Adapter around the external transfer primitive.
///
/// Implementations must be safe to invoke repeatedly for the same item: the
/// dispatcher gives at-least-once delivery and re-runs items that were in
/// flight when a previous run died.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Transfer one item
    async fn transfer(&self, item: &WorkItem, options: &TransferOptions) -> TransferOutcome;

    /// Short backend name used in logs
    fn name(&self) -> &'static str;
}

/// Trait for reporting progress during a run
pub trait ProgressReporter: Send + Sync {
    /// Dispatching is about to start with `total` dispatchable items
    fn on_start(&self, total: u64);

    /// A worker finished one item
    fn on_item_finished(&self, item: &WorkItem, outcome: &TransferOutcome);

    /// The run is over
    fn on_finish(&self, summary: &RunSummary);
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn on_start(&self, _total: u64) {}

    fn on_item_finished(&self, _item: &WorkItem, _outcome: &TransferOutcome) {}

    fn on_finish(&self, _summary: &RunSummary) {}
}
