//! Core type system and error handling for mpcopy
//!
//! This crate provides the foundational types shared by every mpcopy crate:
//!
//! - **Error handling**: one error taxonomy with severity, exit codes and operator labels
//! - **Core types**: work items, transfer options and outcomes, run summaries
//! - **Traits**: the transfer-primitive and progress-reporting seams
//! - **Configuration**: validated worker counts and retry policies
//!
//! # Examples
//!
//! ```rust
//! use mpcopy_types::{Result, RunSummary, WorkItem};
//!
//! fn example_operation() -> Result<RunSummary> {
//!     let item = WorkItem::new("photos/a.jpg");
//!     let mut summary = RunSummary::new();
//!     summary.succeeded = 1;
//!     assert_eq!(item.attempts, 0);
//!     Ok(summary)
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{RetryPolicy, ThreadCount};
pub use error::{Error, ErrorKind, ErrorSeverity};
pub use result::Result;
pub use traits::*;
pub use types::*;
