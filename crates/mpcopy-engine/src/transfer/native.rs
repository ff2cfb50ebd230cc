//! In-process transfer backend
//!
//! Skips files that are already up to date (size and mtime in fast mode,
//! blake3 digest in checksum mode). Otherwise copies through a temporary
//! file next to the destination and renames it into place, so a crash never
//! leaves a half-written destination under the final name.

use async_trait::async_trait;
use filetime::FileTime;
use mpcopy_types::{
    ChangeDetection, Error, Result, TransferExecutor, TransferOptions, TransferOutcome, WorkItem,
};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Copies files with tokio and std primitives
#[derive(Debug, Clone)]
pub struct NativeExecutor {
    source_root: PathBuf,
    target_root: PathBuf,
}

impl NativeExecutor {
    /// Create an executor for the given roots
    pub fn new<S: Into<PathBuf>, T: Into<PathBuf>>(source_root: S, target_root: T) -> Self {
        Self {
            source_root: source_root.into(),
            target_root: target_root.into(),
        }
    }

    async fn copy_item(&self, item: &WorkItem, options: &TransferOptions) -> Result<()> {
        let source = item.resolve(&self.source_root)?;
        let target = item.resolve(&self.target_root)?;

        let source_meta = tokio::fs::metadata(&source)
            .await
            .map_err(|e| Error::transfer(&item.relative_path, format!("{}: {}", source.display(), e)))?;
        if !source_meta.is_file() {
            return Err(Error::transfer(
                &item.relative_path,
                "source is no longer a regular file",
            ));
        }

        if up_to_date(&source, &source_meta, &target, options.detection).await? {
            debug!(path = %item, "target is up to date");
        } else if options.dry_run {
            info!(path = %item, "would copy");
        } else {
            write_through_temp(&source, &source_meta, &target).await?;
            debug!(path = %item, bytes = source_meta.len(), "copied");
        }

        if options.move_source && options.mutates() {
            tokio::fs::remove_file(&source)
                .await
                .map_err(|e| Error::transfer(&item.relative_path, format!("remove source: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransferExecutor for NativeExecutor {
    async fn transfer(&self, item: &WorkItem, options: &TransferOptions) -> TransferOutcome {
        match self.copy_item(item, options).await {
            Ok(()) => TransferOutcome::Success,
            Err(e) => TransferOutcome::Failure(e.to_string()),
        }
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

async fn up_to_date(
    source: &Path,
    source_meta: &Metadata,
    target: &Path,
    detection: ChangeDetection,
) -> Result<bool> {
    let Ok(target_meta) = tokio::fs::metadata(target).await else {
        return Ok(false);
    };
    if !target_meta.is_file() || target_meta.len() != source_meta.len() {
        return Ok(false);
    }

    match detection {
        ChangeDetection::Fast => Ok(FileTime::from_last_modification_time(source_meta)
            == FileTime::from_last_modification_time(&target_meta)),
        ChangeDetection::Checksum => {
            let (a, b) = tokio::try_join!(digest(source.to_path_buf()), digest(target.to_path_buf()))?;
            Ok(a == b)
        }
    }
}

async fn digest(path: PathBuf) -> Result<blake3::Hash> {
    tokio::task::spawn_blocking(move || -> Result<blake3::Hash> {
        let file = std::fs::File::open(&path)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update_reader(file)?;
        Ok(hasher.finalize())
    })
    .await
    .map_err(|e| Error::other(format!("hash task failed: {}", e)))?
}

async fn write_through_temp(source: &Path, source_meta: &Metadata, target: &Path) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| Error::other(format!("{} has no parent", target.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.mpcopy-tmp", file_name));

    let result = async {
        tokio::fs::copy(source, &temp).await?;
        let mtime = FileTime::from_last_modification_time(source_meta);
        let temp_for_times = temp.clone();
        tokio::task::spawn_blocking(move || filetime::set_file_mtime(&temp_for_times, mtime))
            .await
            .map_err(|e| Error::other(format!("set mtime task failed: {}", e)))??;
        tokio::fs::rename(&temp, target).await?;
        Ok::<(), Error>(())
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    struct Roots {
        dir: TempDir,
        source: PathBuf,
        target: PathBuf,
    }

    fn roots() -> Roots {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src/photos");
        let target = dir.path().join("dst/photos");
        fs::create_dir_all(source.join("2019")).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(source.join("2019/a.jpg"), b"jpeg bytes").unwrap();
        Roots {
            dir,
            source,
            target,
        }
    }

    fn execute(detection: ChangeDetection, move_source: bool) -> TransferOptions {
        TransferOptions {
            dry_run: false,
            move_source,
            detection,
        }
    }

    #[rstest]
    #[case(ChangeDetection::Checksum)]
    #[case(ChangeDetection::Fast)]
    #[tokio::test]
    async fn test_copy_creates_target(#[case] detection: ChangeDetection) {
        let roots = roots();
        let exec = NativeExecutor::new(&roots.source, &roots.target);

        let outcome = exec
            .transfer(&WorkItem::new("2019/a.jpg"), &execute(detection, false))
            .await;

        assert!(outcome.is_success());
        let copied = roots.target.join("2019/a.jpg");
        assert_eq!(fs::read(&copied).unwrap(), b"jpeg bytes");
        let src_mtime =
            FileTime::from_last_modification_time(&fs::metadata(roots.source.join("2019/a.jpg")).unwrap());
        let dst_mtime = FileTime::from_last_modification_time(&fs::metadata(&copied).unwrap());
        assert_eq!(src_mtime, dst_mtime);
        assert!(!roots.target.join("2019/.a.jpg.mpcopy-tmp").exists());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let roots = roots();
        let exec = NativeExecutor::new(&roots.source, &roots.target);
        let options = TransferOptions {
            move_source: true,
            ..TransferOptions::default()
        };

        let outcome = exec.transfer(&WorkItem::new("2019/a.jpg"), &options).await;

        assert!(outcome.is_success());
        assert!(!roots.target.join("2019").exists());
        assert!(roots.source.join("2019/a.jpg").exists());
    }

    #[tokio::test]
    async fn test_move_removes_source_after_copy() {
        let roots = roots();
        let exec = NativeExecutor::new(&roots.source, &roots.target);

        let outcome = exec
            .transfer(&WorkItem::new("2019/a.jpg"), &execute(ChangeDetection::Checksum, true))
            .await;

        assert!(outcome.is_success());
        assert!(!roots.source.join("2019/a.jpg").exists());
        assert!(roots.target.join("2019/a.jpg").exists());
    }

    #[tokio::test]
    async fn test_checksum_mode_detects_same_size_change() {
        let roots = roots();
        fs::create_dir_all(roots.target.join("2019")).unwrap();
        fs::write(roots.target.join("2019/a.jpg"), b"JPEG BYTES").unwrap();
        let exec = NativeExecutor::new(&roots.source, &roots.target);

        let outcome = exec
            .transfer(&WorkItem::new("2019/a.jpg"), &execute(ChangeDetection::Checksum, false))
            .await;

        assert!(outcome.is_success());
        assert_eq!(fs::read(roots.target.join("2019/a.jpg")).unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_repeated_transfer_is_idempotent() {
        let roots = roots();
        let exec = NativeExecutor::new(&roots.source, &roots.target);
        let item = WorkItem::new("2019/a.jpg");
        let options = execute(ChangeDetection::Fast, false);

        assert!(exec.transfer(&item, &options).await.is_success());
        assert!(exec.transfer(&item, &options).await.is_success());
        assert_eq!(fs::read(roots.target.join("2019/a.jpg")).unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_missing_source_is_failure() {
        let roots = roots();
        let exec = NativeExecutor::new(&roots.source, &roots.target);

        let outcome = exec
            .transfer(&WorkItem::new("gone.txt"), &execute(ChangeDetection::Fast, false))
            .await;

        assert!(matches!(outcome, TransferOutcome::Failure(cause) if cause.contains("gone.txt")));
    }

    #[tokio::test]
    async fn test_move_refuses_path_outside_roots() {
        let roots = roots();
        let secret = roots.dir.path().join("secret.txt");
        fs::write(&secret, b"keep me").unwrap();
        let exec = NativeExecutor::new(&roots.source, &roots.target);

        let outcome = exec
            .transfer(&WorkItem::new("../../secret.txt"), &execute(ChangeDetection::Fast, true))
            .await;

        assert!(!outcome.is_success());
        assert_eq!(fs::read(&secret).unwrap(), b"keep me");
    }
}
