//! Activity log as JSON lines.
//!
//! Every record is serialized in full and handed to the writer in one
//! `write_all`, so a reader tailing the file only sees whole lines. When the
//! configured file cannot be written the writer moves to the fallback file,
//! then to stderr (prefixed `[BFX-JSONL]`), then drops records.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity record types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AppStart,
    AppStop,
    SessionOpen,
    SessionClose,
    TickFailure,
    Dispatch,
    TargetChange,
    ThrottleToggle,
    RegistryWrite,
    StatusCheck,
    Error,
}

/// A single JSONL log entry. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// `local` or the remote host name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// An entry stamped now, with every optional field unset.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: utc_timestamp(),
            event,
            severity,
            session: None,
            path: None,
            target: None,
            action: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Maximum file size before rotation (bytes). Default: 10 MiB.
    pub max_size_bytes: u64,
    /// Number of rotated files to keep. Default: 3.
    pub max_rotated_files: u32,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: crate::core::config::PathsConfig::default().activity_log,
            fallback_path: Some(std::env::temp_dir().join("bfxdiag-activity.jsonl")),
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl JsonlConfig {
    /// Default rotation and fallback settings with `path` as the primary file.
    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }
}

/// Where lines currently go. Each failure moves one step down:
/// primary file, fallback file, stderr, nothing.
enum Sink {
    File {
        path: PathBuf,
        out: BufWriter<File>,
        len: u64,
        fallback: bool,
    },
    Stderr,
    Discard,
}

fn file_sink(path: &Path, fallback: bool) -> Option<Sink> {
    let (file, len) = open_append(path).ok()?;
    Some(Sink::File {
        path: path.to_path_buf(),
        out: BufWriter::new(file),
        len,
        fallback,
    })
}

/// Append-only activity log with size rotation.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
}

impl JsonlWriter {
    /// Never fails: an unwritable primary path moves down the sink chain.
    pub fn open(config: JsonlConfig) -> Self {
        let sink = file_sink(&config.path, false).unwrap_or_else(|| below_primary(&config));
        Self { config, sink }
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.emit(&line);
            }
            Err(e) => eprintln!("[BFX-JSONL] dropping unserializable entry: {e}"),
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
        }
    }

    /// `normal`, `fallback`, `stderr` or `discard`.
    pub const fn state(&self) -> &'static str {
        match &self.sink {
            Sink::File { fallback: false, .. } => "normal",
            Sink::File { fallback: true, .. } => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    // ──────────────────── sink chain ────────────────────

    fn emit(&mut self, line: &str) {
        let size = line.len() as u64;
        if let Sink::File { len, .. } = &self.sink {
            if *len > 0 && len + size > self.config.max_size_bytes {
                self.rotate();
            }
        }
        loop {
            let delivered = match &mut self.sink {
                Sink::File { out, len, .. } => {
                    let ok = out.write_all(line.as_bytes()).is_ok();
                    if ok {
                        *len += size;
                    }
                    ok
                }
                Sink::Stderr => {
                    eprint!("[BFX-JSONL] {line}");
                    true
                }
                Sink::Discard => true,
            };
            if delivered {
                return;
            }
            self.step_down();
        }
    }

    fn step_down(&mut self) {
        self.sink = match &self.sink {
            Sink::File { fallback: false, .. } => below_primary(&self.config),
            Sink::File { fallback: true, path, .. } => {
                eprintln!("[BFX-JSONL] write to {} failed, using stderr", path.display());
                Sink::Stderr
            }
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
    }

    /// `log` → `log.1` → … → `log.N`; the oldest is overwritten.
    fn rotate(&mut self) {
        let (base, fallback) = match &mut self.sink {
            Sink::File {
                path, out, fallback, ..
            } => {
                let _ = out.flush();
                (path.clone(), *fallback)
            }
            Sink::Stderr | Sink::Discard => return,
        };
        // Close the handle before renaming the file under it.
        self.sink = Sink::Discard;
        for index in (1..self.config.max_rotated_files).rev() {
            let _ = fs::rename(rotated_name(&base, index), rotated_name(&base, index + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));
        self.sink = match file_sink(&base, fallback) {
            Some(sink) => sink,
            None if fallback => Sink::Stderr,
            None => below_primary(&self.config),
        };
    }
}

/// First usable sink after the primary file.
fn below_primary(config: &JsonlConfig) -> Sink {
    if let Some(fb) = config.fallback_path.as_deref() {
        if let Some(sink) = file_sink(fb, true) {
            eprintln!(
                "[BFX-JSONL] {} is not writable, logging to {}",
                config.path.display(),
                fb.display()
            );
            return sink;
        }
    }
    eprintln!("[BFX-JSONL] no writable activity log, using stderr");
    Sink::Stderr
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata().map_or(0, |m| m.len());
    Ok((file, len))
}

/// `activity.jsonl` → `activity.jsonl.2`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
