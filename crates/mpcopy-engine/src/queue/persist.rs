//! Durable file primitives for the queue: atomic snapshot replacement and an
//! append-only, fsynced journal.

use mpcopy_types::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Replace `path` with `contents` so readers only ever see the old or the new file.
///
/// Writes a sibling temp file, fsyncs it, renames it over `path` and fsyncs
/// the parent directory.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = sibling(path, ".tmp");

    let mut file = File::create(&tmp)
        .await
        .map_err(|e| Error::queue_persistence(&tmp, e.to_string()))?;
    file.write_all(contents)
        .await
        .map_err(|e| Error::queue_persistence(&tmp, e.to_string()))?;
    file.sync_all()
        .await
        .map_err(|e| Error::queue_persistence(&tmp, e.to_string()))?;
    drop(file);

    fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::queue_persistence(path, e.to_string()))?;

    sync_parent(path).await
}

/// Remove a file, treating absence as success, and fsync the directory
pub async fn remove_durably(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => sync_parent(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::queue_persistence(path, e.to_string())),
    }
}

/// Read a file as UTF-8, `None` when it does not exist
pub async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io {
            message: format!("{}: {}", path.display(), e),
        }),
    }
}

/// `<path><suffix>` in the same directory
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(unix)]
async fn sync_parent(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let dir = File::open(parent)
        .await
        .map_err(|e| Error::queue_persistence(parent, e.to_string()))?;
    dir.sync_all()
        .await
        .map_err(|e| Error::queue_persistence(parent, e.to_string()))
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}

/// Append-only journal; every append is fsynced before it returns.
///
/// After any failed append the journal is poisoned: the handle is dropped and
/// every later append fails without touching the file, so a partly written
/// line is never followed by another record.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: Option<File>,
    records: usize,
    poisoned: bool,
}

impl Journal {
    /// Journal at `path`; the file is opened on first append
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            records: 0,
            poisoned: false,
        }
    }

    /// Journal file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended since the last reset
    pub fn records(&self) -> usize {
        self.records
    }

    /// Whether an earlier append failed
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Append one line and fsync it
    pub async fn append(&mut self, line: &str) -> Result<()> {
        if self.poisoned {
            return Err(Error::queue_persistence(
                &self.path,
                "journal is unusable after an earlier write failure",
            ));
        }

        match self.write_line(line).await {
            Ok(()) => {
                self.records += 1;
                Ok(())
            }
            Err(e) => {
                self.file = None;
                self.poisoned = true;
                Err(e)
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| Error::queue_persistence(&self.path, e.to_string()))?;
            sync_parent(&self.path).await?;
            self.file = Some(file);
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| Error::queue_persistence(&self.path, e.to_string()))?;
            file.sync_data()
                .await
                .map_err(|e| Error::queue_persistence(&self.path, e.to_string()))?;
        }
        Ok(())
    }

    /// Close and delete the journal after its records were folded into a snapshot.
    ///
    /// A poisoned journal stays poisoned.
    pub async fn reset(&mut self) -> Result<()> {
        self.file = None;
        self.records = 0;
        remove_durably(&self.path).await
    }
}
