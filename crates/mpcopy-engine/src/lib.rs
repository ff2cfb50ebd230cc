//! Resumable parallel copy engine for mpcopy
//!
//! This crate turns a source tree into a durable queue of relative paths and
//! drains it with a bounded pool of workers, each handing one item at a time
//! to a [`TransferExecutor`](mpcopy_types::TransferExecutor).
//!
//! # Features
//!
//! - **Durable queue**: snapshot plus fsynced journal, safe to kill at any point
//! - **Resume**: a restarted run continues from the queue file without re-enumerating
//! - **Worker pool**: no item is ever handed to two workers at once
//! - **Backends**: one `rsync` process per item, or an in-process copy
//!
//! # Examples
//!
//! ```rust,no_run
//! use mpcopy_config::Config;
//! use mpcopy_engine::{build_executor, Orchestrator, RunSettings};
//!
//! # async fn example() -> mpcopy_types::Result<()> {
//! let config = Config::default();
//! let settings = RunSettings::from_config("/data/photos", "/backup/photos", &config)?;
//! let executor = build_executor(
//!     config.transfer.backend,
//!     &config.rsync,
//!     &settings.source,
//!     &settings.target,
//! );
//! let summary = Orchestrator::new(settings, executor).run().await?;
//! println!("{} copied, {} left", summary.succeeded, summary.remaining());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod dispatcher;
pub mod enumerator;
pub mod orchestrator;
pub mod queue;
pub mod transfer;

pub use dispatcher::Dispatcher;
pub use enumerator::{EnumerationStats, PathEnumerator};
pub use orchestrator::{validate_roots, Orchestrator, Phase, Roots, RunSettings, ShutdownHandle};
pub use queue::{LoadedQueue, QueueCounts, QueueHeader, QueueOptions, QueueStore};
pub use transfer::{build_executor, NativeExecutor, RsyncExecutor};
