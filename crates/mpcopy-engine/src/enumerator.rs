//! Source tree enumeration
//!
//! Produces the relative path of every regular file below a source root, in
//! depth-first order with entries sorted by file name inside each directory,
//! so an unchanged tree always yields the same sequence.
//!
//! Directories are traversed, never emitted. Symbolic links, sockets, FIFOs
//! and device nodes are skipped. Zero-length files are regular files and are
//! emitted. Paths that are not valid UTF-8 are skipped because the queue file
//! is UTF-8 text.

use mpcopy_types::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Counters gathered while walking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationStats {
    /// Regular files emitted
    pub files: u64,
    /// Entries that were neither directories nor regular files
    pub skipped_special: u64,
    /// Regular files skipped for non UTF-8 names
    pub skipped_non_utf8: u64,
}

/// Walks a source root and yields relative file paths
#[derive(Debug, Clone)]
pub struct PathEnumerator {
    root: PathBuf,
}

impl PathEnumerator {
    /// Create an enumerator for `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Source root being walked
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazy sequence of relative paths.
    ///
    /// Yields an [`Error::Enumeration`] for the first unreadable entry; callers
    /// are expected to stop at the first error.
    pub fn paths(&self) -> Paths<'_> {
        Paths {
            root: &self.root,
            walker: WalkDir::new(&self.root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
            stats: EnumerationStats::default(),
        }
    }

    /// Walk the whole tree, failing on the first error
    pub fn collect(&self) -> Result<(Vec<PathBuf>, EnumerationStats)> {
        let mut paths = self.paths();
        let mut items = Vec::new();
        for path in &mut paths {
            items.push(path?);
        }
        Ok((items, paths.stats()))
    }
}

/// Iterator returned by [`PathEnumerator::paths`]
pub struct Paths<'a> {
    root: &'a Path,
    walker: walkdir::IntoIter,
    stats: EnumerationStats,
}

impl Paths<'_> {
    /// Counters for the entries seen so far
    pub fn stats(&self) -> EnumerationStats {
        self.stats
    }
}

impl Iterator for Paths<'_> {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map_or_else(|| self.root.to_path_buf(), Path::to_path_buf);
                    return Some(Err(Error::enumeration(path, e.to_string())));
                }
            };

            let file_type = entry.file_type();
            if entry.depth() == 0 {
                if file_type.is_dir() {
                    continue;
                }
                return Some(Err(Error::enumeration(
                    entry.path(),
                    "source root is not a directory",
                )));
            }

            if file_type.is_dir() {
                continue;
            }

            if !file_type.is_file() {
                debug!(path = %entry.path().display(), "skipping non-regular file");
                self.stats.skipped_special += 1;
                continue;
            }

            let relative = match entry.path().strip_prefix(self.root) {
                Ok(relative) => relative,
                Err(e) => return Some(Err(Error::enumeration(entry.path(), e.to_string()))),
            };

            if relative.to_str().is_none() {
                warn!(path = %entry.path().display(), "skipping path that is not valid UTF-8");
                self.stats.skipped_non_utf8 += 1;
                continue;
            }

            self.stats.files += 1;
            return Some(Ok(relative.to_path_buf()));
        }
    }
}
