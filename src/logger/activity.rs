//! Activity logger: a dedicated writer thread fed through a bounded crossbeam channel.
//!
//! Tickers, pollers and dispatch workers all log through a cloneable
//! [`ActivityLoggerHandle`]. `send()` uses `try_send()` so no caller ever
//! blocks on logging back-pressure; overflow is counted and reported.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{DiagError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    AppStarted {
        version: String,
        config_hash: String,
    },
    AppStopped {
        uptime_secs: u64,
    },
    SessionOpened {
        session: u64,
        path: String,
        kind: &'static str,
    },
    SessionClosed {
        session: u64,
        path: String,
    },
    TickFailed {
        session: u64,
        path: String,
        code: String,
        message: String,
        rearmed: bool,
    },
    DispatchCompleted {
        action: String,
        target: String,
        duration_ms: u64,
    },
    DispatchFailed {
        action: String,
        target: String,
        code: String,
        message: String,
    },
    TargetChanged {
        target: String,
    },
    ThrottleToggled {
        target: String,
        value: String,
    },
    RegistryWritten {
        key: String,
        name: String,
        target: String,
    },
    StatusCheckFailed {
        field: &'static str,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to stop the logger thread.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cloneable sender side of the activity log.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Never blocks; an event that does not fit is counted and dropped.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the writer thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// A handle whose events go nowhere; used by tests and one-shot commands.
    #[must_use]
    pub fn disconnected() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

// ──────────────────── spawn ────────────────────

pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Start the writer thread. Dropping every handle (or calling
/// [`ActivityLoggerHandle::shutdown`]) ends it.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::new(AtomicU64::new(0)),
    };
    let overflow = Arc::clone(&handle.dropped_events);
    let jsonl_config = config.jsonl_config;

    let join = thread::Builder::new()
        .name("bfx-logger".to_string())
        .spawn(move || run_writer(&rx, JsonlWriter::open(jsonl_config), &overflow))
        .map_err(|e| DiagError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;
    Ok((handle, join))
}

fn run_writer(rx: &Receiver<ActivityEvent>, mut jsonl: JsonlWriter, overflow: &AtomicU64) {
    for event in rx {
        let lost = overflow.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut note = LogEntry::new(EventType::Error, Severity::Warning);
            note.details = Some(format!("{lost} activity events lost: channel full"));
            jsonl.write_entry(&note);
        }
        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
        // Flush once the burst is drained.
        if rx.is_empty() {
            jsonl.flush();
        }
    }
    jsonl.flush();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::AppStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::AppStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::AppStopped { uptime_secs } => {
            let mut e = LogEntry::new(EventType::AppStop, Severity::Info);
            e.details = Some(format!("uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::SessionOpened {
            session,
            path,
            kind,
        } => {
            let mut e = LogEntry::new(EventType::SessionOpen, Severity::Info);
            e.session = Some(*session);
            e.path = Some(path.clone());
            e.details = Some(format!("kind={kind}"));
            e
        }
        ActivityEvent::SessionClosed { session, path } => {
            let mut e = LogEntry::new(EventType::SessionClose, Severity::Info);
            e.session = Some(*session);
            e.path = Some(path.clone());
            e
        }
        ActivityEvent::TickFailed {
            session,
            path,
            code,
            message,
            rearmed,
        } => {
            let severity = if *rearmed {
                Severity::Warning
            } else {
                Severity::Critical
            };
            let mut e = LogEntry::new(EventType::TickFailure, severity);
            e.session = Some(*session);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.details = Some(format!("rearmed={rearmed}"));
            e
        }
        ActivityEvent::DispatchCompleted {
            action,
            target,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::Dispatch, Severity::Info);
            e.action = Some(action.clone());
            e.target = Some(target.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::DispatchFailed {
            action,
            target,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::Dispatch, Severity::Warning);
            e.action = Some(action.clone());
            e.target = Some(target.clone());
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::TargetChanged { target } => {
            let mut e = LogEntry::new(EventType::TargetChange, Severity::Info);
            e.target = Some(target.clone());
            e
        }
        ActivityEvent::ThrottleToggled { target, value } => {
            let mut e = LogEntry::new(EventType::ThrottleToggle, Severity::Info);
            e.target = Some(target.clone());
            e.details = Some(format!("value={value}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::RegistryWritten { key, name, target } => {
            let mut e = LogEntry::new(EventType::RegistryWrite, Severity::Info);
            e.path = Some(format!(r"{key}\{name}"));
            e.target = Some(target.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::StatusCheckFailed { field, message } => {
            let mut e = LogEntry::new(EventType::StatusCheck, Severity::Warning);
            e.action = Some((*field).to_string());
            e.ok = Some(false);
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::AppStop, Severity::Info),
    }
}
