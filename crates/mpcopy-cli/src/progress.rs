//! Progress bar fed by the dispatcher

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use mpcopy_types::{ProgressReporter, RunSummary, TransferOutcome, WorkItem};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// [`ProgressReporter`] drawing an `indicatif` bar on stderr
pub struct BarReporter {
    bar: Option<ProgressBar>,
    failures: AtomicU64,
}

impl BarReporter {
    /// Visible bar unless `quiet`
    pub fn new(quiet: bool) -> Self {
        if quiet {
            Self::with_bar(None)
        } else {
            Self::with_bar(Some(ProgressBar::new(0)))
        }
    }

    fn with_bar(bar: Option<ProgressBar>) -> Self {
        if let Some(bar) = &bar {
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {msg} [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▉▊▋▌▍▎▏  "),
            );
        }
        Self {
            bar,
            failures: AtomicU64::new(0),
        }
    }

    /// Failed attempts seen so far
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl ProgressReporter for BarReporter {
    fn on_start(&self, total: u64) {
        if let Some(bar) = &self.bar {
            bar.set_length(total);
            bar.set_position(0);
            bar.set_message("Copying");
            bar.enable_steady_tick(Duration::from_millis(100));
        }
    }

    fn on_item_finished(&self, item: &WorkItem, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Success => {
                if let Some(bar) = &self.bar {
                    bar.inc(1);
                    let name = item
                        .relative_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    bar.set_message(name);
                }
            }
            TransferOutcome::Failure(cause) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let line = format!("{} {}: {}", style("✗").red().bold(), item, style(cause).red());
                match &self.bar {
                    Some(bar) => bar.suspend(|| eprintln!("{}", line)),
                    None => eprintln!("{}", line),
                }
            }
        }
    }

    fn on_finish(&self, _summary: &RunSummary) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
