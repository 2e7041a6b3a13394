//! Session sources: bounded whole-file tail and recent-subdirectory listing.
//!
//! Every tick re-reads the source in full; nothing is diffed incrementally.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::core::errors::{DiagError, Result};

/// Timestamp format of directory entries.
pub const MODIFIED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Directory,
}

impl SourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last `max_lines` lines of `bytes`, in order. A trailing newline does
/// not produce an empty final line; `\r\n` endings are normalized.
#[must_use]
pub fn tail_lines(bytes: &[u8], max_lines: usize) -> Vec<String> {
    if max_lines == 0 || bytes.is_empty() {
        return Vec::new();
    }
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);

    // Walk newlines backwards until we have enough line starts.
    let mut start = 0;
    for (found, pos) in memchr::memrchr_iter(b'\n', body).enumerate() {
        if found + 1 == max_lines {
            start = pos + 1;
            break;
        }
    }

    String::from_utf8_lossy(&body[start..])
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect()
}

/// Split action output back into lines. Empty output has no lines; otherwise
/// one trailing newline is dropped, so `"\n"` is a single empty line.
#[must_use]
pub fn output_lines(raw: &str) -> Vec<&str> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.strip_suffix('\n')
        .unwrap_or(raw)
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect()
}

/// Read `path` in full and keep the last `max_lines` lines.
pub fn read_tail(path: &Path, max_lines: usize) -> Result<Vec<String>> {
    let bytes = fs::read(path).map_err(|source| DiagError::io(path, source))?;
    Ok(tail_lines(&bytes, max_lines))
}

/// One row of a directory view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryView {
    pub name: String,
    pub modified: DateTime<Local>,
}

impl fmt::Display for DirEntryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - Last Modified: {}",
            self.name,
            self.modified.format(MODIFIED_FORMAT)
        )
    }
}

/// Immediate subdirectories of `path`, newest first, at most `max_entries`.
pub fn list_recent_dirs(path: &Path, max_entries: usize) -> Result<Vec<DirEntryView>> {
    let read_dir = fs::read_dir(path).map_err(|source| DiagError::io(path, source))?;
    let mut entries: Vec<(SystemTime, String)> = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| DiagError::io(path, source))?;
        // Entries that disappear mid-listing are skipped.
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((modified, entry.file_name().to_string_lossy().into_owned()));
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    entries.truncate(max_entries);
    Ok(entries
        .into_iter()
        .map(|(modified, name)| DirEntryView {
            name,
            modified: DateTime::<Local>::from(modified),
        })
        .collect())
}

/// Newest entry under `dir` whose name passes `accept`, by modification time.
pub fn newest_matching<F>(dir: &Path, want_dir: bool, accept: F) -> Result<Option<String>>
where
    F: Fn(&str) -> bool,
{
    let read_dir = fs::read_dir(dir).map_err(|source| DiagError::io(dir, source))?;
    let mut best: Option<(SystemTime, String)> = None;
    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !accept(&name) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() != want_dir {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().is_none_or(|(t, _)| modified > *t) {
            best = Some((modified, name));
        }
    }
    Ok(best.map(|(_, name)| name))
}
