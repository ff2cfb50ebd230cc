//! On-disk record formats for the queue snapshot and its journal
//!
//! Snapshot: an optional header line followed by one record per pending item.
//!
//! ```text
//! {"format":"mpcopy-queue","version":1,"source":"/src/photos","target":"/dst/photos","built_at":"...","drained":false}
//! {"path":"2019/a.jpg","attempts":0}
//! 2019/b.jpg
//! ```
//!
//! A line that does not start with `{` is a bare relative path with zero
//! attempts. Journal lines are `{"op":"done","path":..}` or
//! `{"op":"fail","path":..,"attempts":n}` where `attempts` is absolute.
//!
//! Every record path must be relative and free of `.` and `..`; anything
//! else makes the file corrupt.

use chrono::{DateTime, Utc};
use mpcopy_types::{is_contained_path, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Format tag written in every header
pub const QUEUE_FORMAT: &str = "mpcopy-queue";
/// Current snapshot format version
pub const QUEUE_VERSION: u32 = 1;

/// First line of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHeader {
    /// Always [`QUEUE_FORMAT`]
    pub format: String,
    /// Snapshot format version
    pub version: u32,
    /// Source root the queue was built from
    pub source: PathBuf,
    /// Target root the queue was built for
    pub target: PathBuf,
    /// When enumeration finished
    pub built_at: DateTime<Utc>,
    /// Set once every item completed
    #[serde(default)]
    pub drained: bool,
}

impl QueueHeader {
    /// Header for a queue built now
    pub fn new<S: Into<PathBuf>, T: Into<PathBuf>>(source: S, target: T) -> Self {
        Self {
            format: QUEUE_FORMAT.to_string(),
            version: QUEUE_VERSION,
            source: source.into(),
            target: target.into(),
            built_at: Utc::now(),
            drained: false,
        }
    }

    /// Whether this header was written for the given roots
    pub fn matches_roots(&self, source: &Path, target: &Path) -> bool {
        self.source == source && self.target == target
    }
}

/// One pending item in the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Relative path
    pub path: PathBuf,
    /// Recorded failed attempts
    #[serde(default)]
    pub attempts: u32,
}

/// One journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    /// The item completed and leaves the queue
    Done {
        /// Relative path
        path: PathBuf,
    },
    /// The item failed; `attempts` is the new absolute count
    Fail {
        /// Relative path
        path: PathBuf,
        /// Recorded failed attempts after this failure
        attempts: u32,
    },
}

impl JournalRecord {
    /// Relative path the entry refers to
    pub fn path(&self) -> &Path {
        match self {
            Self::Done { path } | Self::Fail { path, .. } => path,
        }
    }
}

/// Parsed snapshot contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Header, absent for hand-written queues
    pub header: Option<QueueHeader>,
    /// Records in file order
    pub items: Vec<ItemRecord>,
}

/// Parse snapshot text
pub fn parse_snapshot(path: &Path, text: &str) -> Result<Snapshot> {
    let mut snapshot = Snapshot::default();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        if !line.starts_with('{') {
            let record = ItemRecord {
                path: PathBuf::from(line),
                attempts: 0,
            };
            check_record_path(path, index + 1, &record.path)?;
            snapshot.items.push(record);
            continue;
        }

        if index == 0 && line.contains("\"format\"") {
            let header: QueueHeader = serde_json::from_str(line).map_err(|e| corrupt(path, 1, e))?;
            if header.format != QUEUE_FORMAT || header.version != QUEUE_VERSION {
                return Err(Error::QueueCorrupt {
                    path: path.to_path_buf(),
                    line: 1,
                    message: format!(
                        "unsupported queue format {} v{}",
                        header.format, header.version
                    ),
                });
            }
            snapshot.header = Some(header);
            continue;
        }

        let record: ItemRecord =
            serde_json::from_str(line).map_err(|e| corrupt(path, index + 1, e))?;
        check_record_path(path, index + 1, &record.path)?;
        snapshot.items.push(record);
    }

    Ok(snapshot)
}

/// Render a snapshot as text, one record per line
pub fn render_snapshot<'a, I>(header: Option<&QueueHeader>, items: I) -> Result<String>
where
    I: IntoIterator<Item = &'a ItemRecord>,
{
    let mut out = String::new();
    if let Some(header) = header {
        out.push_str(&to_line(header)?);
    }
    for item in items {
        out.push_str(&to_line(item)?);
    }
    Ok(out)
}

/// Parse journal text.
///
/// A final line without a trailing newline is a torn write and is dropped.
pub fn parse_journal(path: &Path, text: &str) -> Result<(Vec<JournalRecord>, bool)> {
    let torn = !text.is_empty() && !text.ends_with('\n');
    let complete = if torn {
        text.rfind('\n').map_or("", |pos| &text[..=pos])
    } else {
        text
    };

    let mut records = Vec::new();
    for (index, line) in complete.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: JournalRecord =
            serde_json::from_str(line).map_err(|e| corrupt(path, index + 1, e))?;
        check_record_path(path, index + 1, record.path())?;
        records.push(record);
    }

    Ok((records, torn))
}

/// Serialize a value as one newline-terminated JSON line
pub fn to_line<T: Serialize>(value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value)
        .map_err(|e| Error::other(format!("Failed to encode queue record: {}", e)))?;
    line.push('\n');
    Ok(line)
}

fn check_record_path(path: &Path, line: usize, record: &Path) -> Result<()> {
    if is_contained_path(record) {
        return Ok(());
    }
    Err(Error::QueueCorrupt {
        path: path.to_path_buf(),
        line,
        message: format!(
            "record path {:?} is not relative to the transfer roots",
            record
        ),
    })
}

fn corrupt(path: &Path, line: usize, error: serde_json::Error) -> Error {
    Error::QueueCorrupt {
        path: path.to_path_buf(),
        line,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpcopy_types::ErrorKind;
    use rstest::rstest;

    #[test]
    fn test_snapshot_with_header() {
        let header = QueueHeader::new("/src/photos", "/dst/photos");
        let items = vec![
            ItemRecord {
                path: "a.txt".into(),
                attempts: 0,
            },
            ItemRecord {
                path: "dir/b.txt".into(),
                attempts: 3,
            },
        ];
        let text = render_snapshot(Some(&header), &items).unwrap();
        assert_eq!(text.lines().count(), 3);

        let parsed = parse_snapshot(Path::new("q"), &text).unwrap();
        assert_eq!(parsed.header, Some(header));
        assert_eq!(parsed.items, items);
    }

    #[test]
    fn test_bare_paths_are_accepted() {
        let parsed = parse_snapshot(Path::new("q"), "a.txt\r\n\nsub dir/b c.txt\n").unwrap();
        assert!(parsed.header.is_none());
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[1].path, PathBuf::from("sub dir/b c.txt"));
        assert_eq!(parsed.items[1].attempts, 0);
    }

    #[test]
    fn test_malformed_record_is_corrupt() {
        let result = parse_snapshot(Path::new("q"), "a.txt\n{\"path\": 5}\n");
        match result {
            Err(Error::QueueCorrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt queue, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let line = r#"{"format":"mpcopy-queue","version":99,"source":"/a","target":"/b","built_at":"2024-01-01T00:00:00Z"}"#;
        let result = parse_snapshot(Path::new("q"), line);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Queue);
    }

    #[test]
    fn test_journal_torn_tail_is_dropped() {
        let text = "{\"op\":\"done\",\"path\":\"a\"}\n{\"op\":\"fail\",\"path\":\"b\",\"att";
        let (records, torn) = parse_journal(Path::new("j"), text).unwrap();
        assert!(torn);
        assert_eq!(
            records,
            vec![JournalRecord::Done { path: "a".into() }]
        );
    }

    #[test]
    fn test_journal_corrupt_middle_line() {
        let text = "{\"op\":\"done\",\"path\":\"a\"}\ngarbage\n{\"op\":\"done\",\"path\":\"b\"}\n";
        assert!(parse_journal(Path::new("j"), text).is_err());
    }

    #[test]
    fn test_journal_record_encoding() {
        let line = to_line(&JournalRecord::Fail {
            path: "x/y".into(),
            attempts: 2,
        })
        .unwrap();
        assert_eq!(line, "{\"op\":\"fail\",\"path\":\"x/y\",\"attempts\":2}\n");
    }

    #[rstest]
    #[case("/abs/a.txt")]
    #[case("../x")]
    #[case("a/../../x")]
    #[case("./a.txt")]
    #[case("{\"path\":\"/abs/a.txt\"}")]
    #[case("{\"path\":\"a/../../x\",\"attempts\":1}")]
    fn test_escaping_snapshot_record_is_corrupt(#[case] record: &str) {
        let text = format!("ok.txt\n{}\n", record);
        match parse_snapshot(Path::new("q"), &text) {
            Err(Error::QueueCorrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt queue, got {:?}", other),
        }
    }

    #[rstest]
    #[case("{\"op\":\"done\",\"path\":\"/abs\"}")]
    #[case("{\"op\":\"done\",\"path\":\"../x\"}")]
    #[case("{\"op\":\"fail\",\"path\":\"a/../../x\",\"attempts\":2}")]
    fn test_escaping_journal_record_is_corrupt(#[case] record: &str) {
        let text = format!("{{\"op\":\"done\",\"path\":\"a\"}}\n{}\n", record);
        match parse_journal(Path::new("j"), &text) {
            Err(Error::QueueCorrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt journal, got {:?}", other),
        }
    }
}
