//! Configuration management for mpcopy
//!
//! Settings are layered: built-in defaults, then an optional YAML/TOML/JSON
//! file, then `MPCOPY__SECTION__KEY` environment variables. Command-line flags
//! are applied on top by the binary.
//!
//! # Examples
//!
//! ```rust
//! use mpcopy_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_env_prefix("MPCOPY")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Workers: {}", config.transfer.threads.get());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use mpcopy_types::{ChangeDetection, RetryPolicy, ThreadCount, TransferOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Default queue file name, relative to the working directory
pub const DEFAULT_QUEUE_FILE: &str = "mpcopy.queue";

/// Main configuration structure for mpcopy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transfer behaviour
    pub transfer: TransferConfig,
    /// Durable queue settings
    pub queue: QueueConfig,
    /// rsync invocation settings
    pub rsync: RsyncConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Which transfer primitive performs the byte copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferBackend {
    /// One `rsync` subprocess per item
    #[default]
    Rsync,
    /// In-process copy
    Native,
}

impl std::str::FromStr for TransferBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsync" => Ok(Self::Rsync),
            "native" => Ok(Self::Native),
            other => Err(ConfigError::invalid_value(
                "transfer.backend",
                format!("unknown backend '{other}', expected rsync or native"),
            )),
        }
    }
}

/// Transfer behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Number of concurrent workers
    pub threads: ThreadCount,
    /// Actually transfer; otherwise simulate
    pub execute: bool,
    /// Remove each source file after it is in place
    pub move_source: bool,
    /// Compare size and mtime instead of content
    pub fast: bool,
    /// Create the target root when it does not exist
    pub create_target: bool,
    /// Transfer primitive
    pub backend: TransferBackend,
    /// Extra in-run attempts for a failed item
    pub retries_per_run: u32,
    /// Quarantine items after this many recorded failures
    pub max_attempts: Option<u32>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            threads: ThreadCount::default(),
            execute: false,
            move_source: false,
            fast: false,
            create_target: false,
            backend: TransferBackend::default(),
            retries_per_run: 0,
            max_attempts: None,
        }
    }
}

impl TransferConfig {
    /// Options handed to the transfer backend for every item
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            dry_run: !self.execute,
            move_source: self.move_source,
            detection: if self.fast {
                ChangeDetection::Fast
            } else {
                ChangeDetection::Checksum
            },
        }
    }

    /// Retry policy derived from the retry settings
    pub fn retry_policy(&self) -> ConfigResult<RetryPolicy> {
        RetryPolicy::new(self.retries_per_run, self.max_attempts)
            .map_err(|message| ConfigError::invalid_value("transfer.max_attempts", message))
    }
}

/// Durable queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Snapshot file; the journal lives next to it
    #[serde(default = "default_queue_file")]
    pub queue_file: PathBuf,
    /// Journal records between snapshot rewrites
    #[serde(default = "default_compact_every")]
    pub compact_every: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_file: default_queue_file(),
            compact_every: default_compact_every(),
        }
    }
}

fn default_queue_file() -> PathBuf {
    PathBuf::from(DEFAULT_QUEUE_FILE)
}

fn default_compact_every() -> usize {
    1024
}

/// rsync invocation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsyncConfig {
    /// Program to execute
    pub program: String,
    /// Flags passed on every invocation
    pub args: Vec<String>,
    /// Patterns passed as `--exclude`
    pub excludes: Vec<String>,
    /// Rules passed as `--filter`
    pub filters: Vec<String>,
}

impl Default for RsyncConfig {
    fn default() -> Self {
        Self {
            program: "rsync".to_string(),
            args: [
                "-v",
                "-v",
                "--perms",
                "--links",
                "--times",
                "--itemize-changes",
                "--stats",
                "--backup",
                "--suffix=.backup",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            excludes: [
                ".DS_Store",
                ".Trashes",
                ".Trash",
                "._.Trashes",
                ".localized",
                ".DocumentRevisions-*",
                ".Spotlight*",
                ".fseventsd",
                ".apdisk",
                ".com.apple.timemachine.donotpresent",
                ".fcplock",
                ".fcpuser",
                ".cache",
                "._.TemporaryItems",
                "._.apdisk",
                ".TemporaryItems",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            filters: vec![
                "dir-merge /.rsync.include".to_string(),
                "dir-merge /.rsync.exclude".to_string(),
            ],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name (case-insensitive)
    pub level: String,
    /// Directory that receives `mpcopy.log`
    pub log_dir: PathBuf,
    /// Write the log file in addition to stderr
    pub file_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            log_dir: PathBuf::from("."),
            file_logging: true,
        }
    }
}

impl LoggingConfig {
    /// `tracing` filter directive for the configured level
    pub fn filter_directive(&self) -> ConfigResult<&'static str> {
        parse_level(&self.level)
    }
}

/// Map an operator-supplied level name onto a `tracing` level directive.
///
/// Accepts the usual names in any case, plus `WARNING` and `CRITICAL`.
pub fn parse_level(level: &str) -> ConfigResult<&'static str> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok("trace"),
        "DEBUG" => Ok("debug"),
        "INFO" => Ok("info"),
        "WARN" | "WARNING" => Ok("warn"),
        "ERROR" | "CRITICAL" => Ok("error"),
        _ => Err(ConfigError::invalid_value(
            "logging.level",
            format!("invalid log level '{level}'"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transfer.threads.get(), 1);
        assert!(!config.transfer.execute);
        assert_eq!(config.transfer.backend, TransferBackend::Rsync);
        assert_eq!(config.queue.queue_file, PathBuf::from("mpcopy.queue"));
        assert_eq!(config.queue.compact_every, 1024);
        assert_eq!(config.rsync.program, "rsync");
        assert!(config.rsync.args.contains(&"--suffix=.backup".to_string()));
        assert_eq!(config.rsync.excludes.len(), 16);
        assert_eq!(config.logging.level, "INFO");
    }

    #[test]
    fn test_transfer_options_mapping() {
        let mut transfer = TransferConfig::default();
        let options = transfer.transfer_options();
        assert!(options.dry_run);
        assert_eq!(options.detection, ChangeDetection::Checksum);

        transfer.execute = true;
        transfer.fast = true;
        transfer.move_source = true;
        let options = transfer.transfer_options();
        assert!(!options.dry_run);
        assert!(options.move_source);
        assert_eq!(options.detection, ChangeDetection::Fast);
    }

    #[rstest]
    #[case("WARN", "warn")]
    #[case("warning", "warn")]
    #[case("Info", "info")]
    #[case("DEBUG", "debug")]
    #[case("critical", "error")]
    fn test_parse_level(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(parse_level(input).unwrap(), expected);
    }

    #[test]
    fn test_parse_level_rejects_unknown() {
        assert!(parse_level("LOUD").is_err());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Native".parse::<TransferBackend>().unwrap(), TransferBackend::Native);
        assert!("scp".parse::<TransferBackend>().is_err());
    }

    #[test]
    fn test_zero_max_attempts_is_invalid() {
        let transfer = TransferConfig {
            max_attempts: Some(0),
            ..TransferConfig::default()
        };
        assert!(transfer.retry_policy().is_err());
    }
}
