//! Durable work queue
//!
//! The queue file is the only record of progress across restarts. It is kept
//! as a snapshot plus an append-only journal:
//!
//! - `record`: line formats and parsing
//! - `persist`: atomic replace, fsynced journal appends
//! - `store`: [`QueueStore`], the in-memory queue and its single-writer path

pub mod persist;
pub mod record;
pub mod store;

pub use record::{ItemRecord, JournalRecord, QueueHeader, QUEUE_FORMAT, QUEUE_VERSION};
pub use store::{LoadedQueue, QueueCounts, QueueOptions, QueueStore};
