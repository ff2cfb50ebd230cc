//! Operator-facing output for the mpcopy CLI

use console::style;
use mpcopy_types::{Error, RunSummary};
use std::time::Duration;

/// Process exit code for a completed run
pub fn summary_exit_code(summary: &RunSummary) -> i32 {
    if let Some(interrupted) = summary.interruption() {
        interrupted.exit_code()
    } else if summary.failed > 0 || summary.quarantined > 0 {
        1
    } else {
        0
    }
}

/// Print the end-of-run table
pub fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!();
    let title = if dry_run {
        "Dry run summary (nothing was changed):"
    } else {
        "Copy summary:"
    };
    println!("{}", style(title).bold().underlined());
    println!("  Succeeded: {}", style(summary.succeeded).green());
    println!(
        "  Failed: {}",
        if summary.failed > 0 {
            style(summary.failed).red()
        } else {
            style(summary.failed).green()
        }
    );
    println!("  Pending: {}", style(summary.pending).yellow());
    if summary.quarantined > 0 {
        println!("  Quarantined: {}", style(summary.quarantined).red());
    }
    if summary.failed_attempts > 0 {
        println!("  Failed attempts: {}", style(summary.failed_attempts).dim());
    }
    println!(
        "  Duration: {}",
        style(format_duration(summary.duration)).blue()
    );

    if let Some(interrupted) = summary.interruption() {
        println!(
            "{} {}; rerun with the same queue file to continue",
            style("⚠").yellow().bold(),
            interrupted
        );
    } else if summary.remaining() > 0 {
        println!(
            "{} {} items left in the queue; rerun to retry them",
            style("⚠").yellow().bold(),
            summary.remaining()
        );
    } else {
        println!("{} Queue drained", style("✓").green().bold());
    }
}

/// Print a fatal error with its operator label
pub fn print_error(error: &Error) {
    eprintln!(
        "{} {}: {}",
        style("✗").red().bold(),
        style(error.condition()).red().bold(),
        error
    );
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::from_millis(1500), "1.50s")]
    #[case(Duration::from_secs(125), "2m 5s")]
    #[case(Duration::from_secs(3725), "1h 2m 5s")]
    fn test_format_duration(#[case] duration: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(duration), expected);
    }

    #[test]
    fn test_summary_exit_code() {
        let mut summary = RunSummary::new();
        summary.succeeded = 4;
        assert_eq!(summary_exit_code(&summary), 0);

        summary.failed = 1;
        assert_eq!(summary_exit_code(&summary), 1);

        summary.interrupted = true;
        assert_eq!(summary_exit_code(&summary), 130);
    }
}
