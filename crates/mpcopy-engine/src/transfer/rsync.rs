//! rsync subprocess backend
//!
//! Each item is one `rsync` invocation copying `<source>/<rel>` into the
//! directory `<target>/<dirname(rel)>/`.

use async_trait::async_trait;
use mpcopy_config::RsyncConfig;
use mpcopy_types::{
    ChangeDetection, Result, TransferExecutor, TransferOptions, TransferOutcome, WorkItem,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs the configured `rsync` program once per item
#[derive(Debug, Clone)]
pub struct RsyncExecutor {
    config: RsyncConfig,
    source_root: PathBuf,
    target_root: PathBuf,
}

impl RsyncExecutor {
    /// Create an executor for the given roots
    pub fn new<S: Into<PathBuf>, T: Into<PathBuf>>(
        config: RsyncConfig,
        source_root: S,
        target_root: T,
    ) -> Self {
        Self {
            config,
            source_root: source_root.into(),
            target_root: target_root.into(),
        }
    }

    /// Directory on the target side that receives `item`
    pub fn target_dir(&self, item: &WorkItem) -> PathBuf {
        match item.relative_path.parent() {
            Some(parent) => self.target_root.join(parent),
            None => self.target_root.clone(),
        }
    }

    /// Full argument vector for one item, program excluded
    pub fn command_args(&self, item: &WorkItem, options: &TransferOptions) -> Result<Vec<OsString>> {
        let source = item.resolve(&self.source_root)?;
        let mut args: Vec<OsString> = self.config.args.iter().map(OsString::from).collect();
        args.extend(
            self.config
                .excludes
                .iter()
                .map(|pattern| OsString::from(format!("--exclude={pattern}"))),
        );
        args.extend(
            self.config
                .filters
                .iter()
                .map(|rule| OsString::from(format!("--filter={rule}"))),
        );

        if options.dry_run {
            args.push("--dry-run".into());
        }
        if options.detection == ChangeDetection::Checksum {
            args.push("--checksum".into());
        }
        if options.move_source {
            args.push("--remove-source-files".into());
        }

        args.push(source.into_os_string());
        // trailing separator keeps rsync treating the destination as a directory
        let mut target = self.target_dir(item).into_os_string();
        target.push(std::path::MAIN_SEPARATOR_STR);
        args.push(target);
        Ok(args)
    }

    async fn ensure_target_dir(dir: &Path) -> std::io::Result<()> {
        if tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) {
            return Ok(());
        }
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o775);
        builder.create(dir).await
    }
}

#[async_trait]
impl TransferExecutor for RsyncExecutor {
    async fn transfer(&self, item: &WorkItem, options: &TransferOptions) -> TransferOutcome {
        let args = match self.command_args(item, options) {
            Ok(args) => args,
            Err(e) => return TransferOutcome::Failure(e.to_string()),
        };

        if options.mutates() {
            let dir = self.target_dir(item);
            if let Err(e) = Self::ensure_target_dir(&dir).await {
                return TransferOutcome::Failure(format!(
                    "cannot create target directory {}: {}",
                    dir.display(),
                    e
                ));
            }
        }

        debug!(program = %self.config.program, ?args, "running rsync");

        let output = match Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return TransferOutcome::Failure(format!(
                    "failed to start {}: {}",
                    self.config.program, e
                ))
            }
        };

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if !line.is_empty() {
                debug!(path = %item, "{}", line);
            }
        }

        if output.status.success() {
            return TransferOutcome::Success;
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.is_empty()) {
            warn!(path = %item, "{}", line);
        }
        let cause = stderr.trim();
        TransferOutcome::Failure(if cause.is_empty() {
            format!("{} exited with {}", self.config.program, output.status)
        } else {
            format!("{} exited with {}: {}", self.config.program, output.status, cause)
        })
    }

    fn name(&self) -> &'static str {
        "rsync"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor(program: &str, source: &Path, target: &Path) -> RsyncExecutor {
        let config = RsyncConfig {
            program: program.to_string(),
            ..RsyncConfig::default()
        };
        RsyncExecutor::new(config, source, target)
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_command_args_dry_run_checksum() {
        let exec = executor("rsync", Path::new("/src/photos"), Path::new("/dst/photos"));
        let args = strings(&exec.command_args(&WorkItem::new("2019/a.jpg"), &TransferOptions::default()).unwrap());

        assert_eq!(&args[..2], &["-v", "-v"]);
        assert!(args.contains(&"--exclude=.DS_Store".to_string()));
        assert!(args.contains(&"--filter=dir-merge /.rsync.include".to_string()));
        assert!(args.contains(&"--dry-run".to_string()));
        assert!(args.contains(&"--checksum".to_string()));
        assert!(!args.contains(&"--remove-source-files".to_string()));

        let n = args.len();
        assert_eq!(args[n - 2], "/src/photos/2019/a.jpg");
        assert_eq!(args[n - 1], format!("/dst/photos/2019{}", std::path::MAIN_SEPARATOR));
    }

    #[test]
    fn test_command_args_execute_fast_move() {
        let exec = executor("rsync", Path::new("/s/x"), Path::new("/t/x"));
        let options = TransferOptions {
            dry_run: false,
            move_source: true,
            detection: ChangeDetection::Fast,
        };
        let args = strings(&exec.command_args(&WorkItem::new("top.txt"), &options).unwrap());

        assert!(!args.contains(&"--dry-run".to_string()));
        assert!(!args.contains(&"--checksum".to_string()));
        assert!(args.contains(&"--remove-source-files".to_string()));
        assert_eq!(args.last().unwrap(), &format!("/t/x{}", std::path::MAIN_SEPARATOR));
    }

    #[tokio::test]
    async fn test_missing_program_is_failure() {
        let temp_dir = TempDir::new().unwrap();
        let exec = executor(
            "/nonexistent/mpcopy-rsync",
            temp_dir.path(),
            temp_dir.path(),
        );
        let outcome = exec
            .transfer(&WorkItem::new("a"), &TransferOptions::default())
            .await;
        assert!(matches!(outcome, TransferOutcome::Failure(cause) if cause.contains("failed to start")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let temp_dir = TempDir::new().unwrap();
        let exec = executor("false", temp_dir.path(), temp_dir.path());
        let outcome = exec
            .transfer(&WorkItem::new("a"), &TransferOptions::default())
            .await;
        assert!(!outcome.is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dry_run_does_not_create_target_dir() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        let exec = executor("true", temp_dir.path(), &target);

        let outcome = exec
            .transfer(&WorkItem::new("deep/a.txt"), &TransferOptions::default())
            .await;
        assert!(outcome.is_success());
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_creates_target_dir() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        let exec = executor("true", temp_dir.path(), &target);
        let options = TransferOptions {
            dry_run: false,
            ..TransferOptions::default()
        };

        let outcome = exec.transfer(&WorkItem::new("deep/a.txt"), &options).await;
        assert!(outcome.is_success());
        assert!(target.join("deep").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_escaping_item_never_reaches_rsync() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("root/target");
        let exec = executor("true", &temp_dir.path().join("root/source"), &target);
        let options = TransferOptions {
            dry_run: false,
            ..TransferOptions::default()
        };

        let outcome = exec.transfer(&WorkItem::new("../../x/a.txt"), &options).await;
        assert!(!outcome.is_success());
        assert!(!temp_dir.path().join("x").exists());
        assert!(!target.exists());
    }
}
