//! Transfer backends
//!
//! The engine only sees [`TransferExecutor`]; these are the two shipped
//! implementations.

pub mod native;
pub mod rsync;

pub use native::NativeExecutor;
pub use rsync::RsyncExecutor;

use mpcopy_config::{RsyncConfig, TransferBackend};
use mpcopy_types::TransferExecutor;
use std::path::Path;
use std::sync::Arc;

/// Build the executor selected by `backend`
pub fn build_executor(
    backend: TransferBackend,
    rsync: &RsyncConfig,
    source_root: &Path,
    target_root: &Path,
) -> Arc<dyn TransferExecutor> {
    match backend {
        TransferBackend::Rsync => Arc::new(RsyncExecutor::new(
            rsync.clone(),
            source_root,
            target_root,
        )),
        TransferBackend::Native => Arc::new(NativeExecutor::new(source_root, target_root)),
    }
}
