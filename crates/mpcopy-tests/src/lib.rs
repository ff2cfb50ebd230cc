//! mpcopy integration testing suite
//!
//! Shared fixtures for the integration tests and queue benchmarks: source
//! trees on disk and scripted transfer backends.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Unified test utilities
///
/// Tree builders, settings helpers and scripted executors used by every
/// test and benchmark in this crate.
pub mod test_utils;

pub use test_utils::*;
