//! Error types and handling for mpcopy
//!
//! Every failure the coordinator can observe is mapped onto one [`Error`]
//! variant. Variants are grouped into an [`ErrorKind`] that decides whether the
//! run may continue (per-item transfer failures) or must stop (everything that
//! would leave the durable queue unaccounted for).

use std::path::PathBuf;

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Low severity - operation can continue
    Low,
    /// Medium severity - the affected item is retried later
    Medium,
    /// High severity - the run is aborted before dispatching
    High,
    /// Critical severity - dispatching must stop immediately
    Critical,
}

/// Main error type for mpcopy operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing or malformed configuration
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the supplied configuration
        message: String,
    },

    /// Source root does not exist or is not a directory
    #[error("Source path does not exist: {path}")]
    SourcePathMissing {
        /// Source root that was checked
        path: PathBuf,
    },

    /// Target root does not exist and create-target was not requested
    #[error("Target path does not exist: {path}")]
    TargetPathMissing {
        /// Target root that was checked
        path: PathBuf,
    },

    /// Source and target roots do not share the same final component
    #[error("Source and target must have the same starting point: {source_root} vs {target_root}")]
    RootMismatch {
        /// Canonical source root
        source_root: PathBuf,
        /// Canonical target root
        target_root: PathBuf,
    },

    /// Walking the source tree failed; nothing was persisted
    #[error("Enumeration of {path} failed: {message}")]
    Enumeration {
        /// Path at which the walk failed
        path: PathBuf,
        /// Underlying failure
        message: String,
    },

    /// The transfer primitive reported failure for one item
    #[error("Transfer of {path} failed: {message}")]
    Transfer {
        /// Relative path of the item
        path: PathBuf,
        /// Cause reported by the transfer primitive
        message: String,
    },

    /// The durable queue could not be written
    #[error("Queue persistence failed for {path}: {message}")]
    QueuePersistence {
        /// Queue file (or journal) being written
        path: PathBuf,
        /// Underlying failure
        message: String,
    },

    /// The durable queue contains a record that cannot be parsed
    #[error("Queue file {path} is corrupt at line {line}: {message}")]
    QueueCorrupt {
        /// Queue file (or journal) being read
        path: PathBuf,
        /// 1-based line number of the offending record
        line: usize,
        /// Parser message
        message: String,
    },

    /// `initialize` was called on a queue that already holds work
    #[error("Queue {path} already holds pending work; refusing to overwrite it")]
    QueueAlreadyInitialized {
        /// Queue file that would have been overwritten
        path: PathBuf,
    },

    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// The run was interrupted before the queue drained
    #[error("Interrupted")]
    Interrupted,

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration and argument problems
    Validation,
    /// Source or target root problems
    Root,
    /// Source tree walk failures
    Enumeration,
    /// Per-item transfer failures
    Transfer,
    /// Durable queue failures
    Queue,
    /// I/O failures outside the queue
    Io,
    /// External interruption
    Interrupted,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::Config { .. } => ErrorKind::Validation,
            Self::SourcePathMissing { .. }
            | Self::TargetPathMissing { .. }
            | Self::RootMismatch { .. } => ErrorKind::Root,
            Self::Enumeration { .. } => ErrorKind::Enumeration,
            Self::Transfer { .. } => ErrorKind::Transfer,
            Self::QueuePersistence { .. }
            | Self::QueueCorrupt { .. }
            | Self::QueueAlreadyInitialized { .. } => ErrorKind::Queue,
            Self::Io { .. } => ErrorKind::Io,
            Self::Interrupted => ErrorKind::Interrupted,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::Transfer => ErrorSeverity::Medium,
            ErrorKind::Interrupted => ErrorSeverity::Low,
            ErrorKind::Validation | ErrorKind::Root | ErrorKind::Enumeration => {
                ErrorSeverity::High
            }
            ErrorKind::Queue => ErrorSeverity::Critical,
            ErrorKind::Io | ErrorKind::Other => ErrorSeverity::High,
        }
    }

    /// Whether this error ends the whole run.
    ///
    /// Only per-item transfer failures are recovered locally.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transfer { .. })
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Transfer { .. } | Self::Io { .. } | Self::Other { .. } => 1,
            Self::Validation { .. } | Self::Config { .. } => 2,
            Self::SourcePathMissing { .. } => 3,
            Self::TargetPathMissing { .. } => 4,
            Self::RootMismatch { .. } => 5,
            Self::Enumeration { .. } => 6,
            Self::QueuePersistence { .. }
            | Self::QueueCorrupt { .. }
            | Self::QueueAlreadyInitialized { .. } => 7,
            Self::Interrupted => 130,
        }
    }

    /// Stable operator-facing condition label
    pub fn condition(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::SourcePathMissing { .. } => "SOURCE_DOES_NOT_EXIST",
            Self::TargetPathMissing { .. } => "TARGET_PATH_DOES_NOT_EXIST",
            Self::RootMismatch { .. } => "SOURCE_TARGET_MISMATCH",
            Self::Enumeration { .. } => "ENUMERATION_FAILED",
            Self::Transfer { .. } => "TRANSFER_FAILED",
            Self::QueuePersistence { .. } => "QUEUE_PERSISTENCE_FAILED",
            Self::QueueCorrupt { .. } => "QUEUE_CORRUPT",
            Self::QueueAlreadyInitialized { .. } => "QUEUE_ALREADY_INITIALIZED",
            Self::Io { .. } => "IO_ERROR",
            Self::Interrupted => "INTERRUPTED",
            Self::Other { .. } => "ERROR",
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new enumeration error
    pub fn enumeration<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Enumeration {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new per-item transfer error
    pub fn transfer<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Transfer {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new queue persistence error
    pub fn queue_persistence<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::QueuePersistence {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}
