//! Dashboard state and the single loop that applies worker results.
//!
//! Every mutation of sessions, the status snapshot and the status line
//! happens on the thread that owns the [`Dashboard`]. Workers only send
//! [`UiEvent`]s.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::app::event::{FollowUp, UiEvent};
use crate::core::config::Config;
use crate::core::errors::{DiagError, Result};
use crate::dispatch::action::Action;
use crate::dispatch::catalog;
use crate::dispatch::dispatcher::{DispatchStatus, Dispatcher};
use crate::dispatch::target::Secret;
use crate::logger::activity::ActivityEvent;
use crate::session::manager::{SessionId, SessionManager, TickApplied};
use crate::session::scheduler::{TickReport, TickSink};
use crate::status::poller::{StatusPoller, StatusReport, StatusSink};
use crate::status::probe::parse_port_check;
use crate::status::snapshot::{FieldValue, StatusField, StatusSnapshot, StatusUpdate};
use crate::status::throttle::ThrottleToggler;
use crate::text::highlight::{HighlightRules, SharedRules, Style};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Info,
    Busy,
    Success,
    Error,
}

/// One-line feedback shown under the panels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub message: String,
    pub tone: Tone,
}

impl StatusLine {
    fn new(tone: Tone, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            tone,
        }
    }
}

pub struct Dashboard {
    config: Arc<Config>,
    dispatcher: Dispatcher,
    rules: SharedRules,
    sessions: SessionManager,
    poller: Option<StatusPoller>,
    status: StatusSnapshot,
    status_line: StatusLine,
    throttle: Arc<ThrottleToggler>,
    tx: Sender<UiEvent>,
    rx: Receiver<UiEvent>,
}

impl Dashboard {
    #[must_use]
    pub fn new(config: Arc<Config>, dispatcher: Dispatcher) -> Self {
        let (tx, rx) = unbounded();
        let rules = SharedRules::new(HighlightRules::from_config(&config.highlight));
        let tick_tx = tx.clone();
        let sink: TickSink = Arc::new(move |report: TickReport| {
            let _ = tick_tx.send(UiEvent::Tick(report));
        });
        let sessions = SessionManager::new(
            dispatcher.clone(),
            rules.clone(),
            config.refresh.clone(),
            sink,
        );
        Self {
            config,
            dispatcher,
            rules,
            sessions,
            poller: None,
            status: StatusSnapshot::default(),
            status_line: StatusLine::new(Tone::Info, "Ready"),
            throttle: Arc::new(ThrottleToggler::new()),
            tx,
            rx,
        }
    }

    /// Start the status poller. Its first round of checks runs immediately.
    pub fn start_status(&mut self) -> Result<()> {
        let tx = self.tx.clone();
        let sink: StatusSink = Arc::new(move |report: StatusReport| {
            let _ = tx.send(UiEvent::Status(report));
        });
        self.poller = Some(StatusPoller::start(
            self.dispatcher.clone(),
            Arc::clone(&self.config),
            sink,
        )?);
        Ok(())
    }

    // ──────────────────── accessors ────────────────────

    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionManager {
        &mut self.sessions
    }

    #[must_use]
    pub const fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    #[must_use]
    pub const fn status_line(&self) -> &StatusLine {
        &self.status_line
    }

    #[must_use]
    pub const fn rules(&self) -> &SharedRules {
        &self.rules
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ──────────────────── event loop ────────────────────

    /// Wait up to `timeout` for one event, then drain whatever else is
    /// queued. Returns how many events were applied.
    pub fn pump(&mut self, timeout: Duration) -> usize {
        let Ok(first) = self.rx.recv_timeout(timeout) else {
            return 0;
        };
        self.handle(first);
        let mut applied = 1;
        while let Ok(event) = self.rx.try_recv() {
            self.handle(event);
            applied += 1;
        }
        applied
    }

    pub fn handle(&mut self, event: UiEvent) {
        match event {
            UiEvent::Tick(report) => self.on_tick(report),
            UiEvent::Status(report) => {
                if report.generation == self.dispatcher.selector().generation() {
                    self.status.apply(report.update);
                }
            }
            UiEvent::Dispatch { status, follow_up } => self.on_dispatch(status, follow_up),
        }
    }

    fn on_tick(&mut self, report: TickReport) {
        let id = report.session;
        if let TickApplied::Failed { message, rearmed } = self.sessions.apply_tick(report) {
            if self.sessions.focused() == Some(id) {
                let title = self.sessions.title(id).unwrap_or_default();
                let suffix = if rearmed { "" } else { " (refresh stopped)" };
                self.status_line = StatusLine::new(Tone::Error, format!("{title}: {message}{suffix}"));
            }
        }
    }

    fn on_dispatch(&mut self, status: DispatchStatus, follow_up: FollowUp) {
        match status {
            DispatchStatus::InProgress { action, target } => {
                self.status_line = StatusLine::new(Tone::Busy, format!("{action} on {target}..."));
            }
            DispatchStatus::Completed {
                action,
                generation,
                output,
                ..
            } => {
                let stale = generation != self.dispatcher.selector().generation();
                let summary = output.lines().map(str::trim).find(|l| !l.is_empty());
                self.status_line = StatusLine::new(
                    Tone::Success,
                    summary.map_or_else(|| format!("{action}: done"), |s| format!("{action}: {s}")),
                );
                if !stale {
                    self.follow_up(follow_up, &output);
                }
            }
            DispatchStatus::Failed {
                action,
                generation,
                error,
                ..
            } => {
                self.status_line = StatusLine::new(Tone::Error, format!("{action} failed: {error}"));
                let current = generation == self.dispatcher.selector().generation();
                if current && follow_up == FollowUp::SetThrottle {
                    self.status
                        .apply(StatusUpdate::Throttle(FieldValue::from_result(Err(error))));
                }
            }
        }
    }

    fn follow_up(&mut self, follow_up: FollowUp, output: &str) {
        match follow_up {
            FollowUp::None => {}
            FollowUp::OpenFile => {
                if let Err(e) = self.sessions.open_file(output.trim()) {
                    self.status_line = StatusLine::new(Tone::Error, e.to_string());
                }
            }
            FollowUp::RefreshStatus(field) => {
                if let Some(poller) = &self.poller {
                    if let Err(e) = poller.refresh(field) {
                        self.status_line = StatusLine::new(Tone::Error, e.to_string());
                    }
                }
            }
            FollowUp::SetThrottle => {
                self.status
                    .apply(StatusUpdate::Throttle(FieldValue::Value(output.trim().to_string())));
            }
        }
    }

    fn run(&self, action: Action, follow_up: FollowUp) {
        let tx = self.tx.clone();
        self.dispatcher.dispatch_with(action, move |status| {
            let _ = tx.send(UiEvent::Dispatch { status, follow_up });
        });
    }

    // ──────────────────── target ────────────────────

    /// Switch to a remote host. Sessions and status re-read from it.
    pub fn set_remote(&mut self, host: &str, username: &str, secret: Secret) -> Result<()> {
        self.dispatcher.selector().set_remote(host, username, secret)?;
        self.after_target_change();
        Ok(())
    }

    pub fn clear_remote(&mut self) {
        self.dispatcher.selector().clear_remote();
        self.after_target_change();
    }

    fn after_target_change(&mut self) {
        let label = self.dispatcher.selector().snapshot().target.label().to_string();
        self.dispatcher
            .logger()
            .send(ActivityEvent::TargetChanged { target: label.clone() });
        self.status = StatusSnapshot::default();
        if let Err(e) = self.sessions.refresh_all() {
            self.status_line = StatusLine::new(Tone::Error, e.to_string());
            return;
        }
        if let Some(poller) = &self.poller {
            if let Err(e) = poller.refresh_all() {
                self.status_line = StatusLine::new(Tone::Error, e.to_string());
                return;
            }
        }
        self.status_line = StatusLine::new(Tone::Info, format!("Target: {label}"));
    }

    // ──────────────────── sessions ────────────────────

    pub fn open_file(&mut self, path: &str) -> Result<SessionId> {
        self.sessions.open_file(path)
    }

    pub fn open_directory(&mut self, path: &str) -> Result<SessionId> {
        self.sessions.open_directory(path)
    }

    /// Look up the newest agent log on the target and open it.
    pub fn open_latest_log(&self) {
        self.run(catalog::latest_log(&self.config.agent), FollowUp::OpenFile);
    }

    /// Watch the agent data folder as a directory session.
    pub fn monitor_data_folder(&mut self) -> Result<SessionId> {
        let dir = self.config.agent.data_dir.to_string_lossy().into_owned();
        self.sessions.open_directory(&dir)
    }

    /// Change the style of one keyword and redraw with it.
    pub fn change_color(&mut self, keyword: &str, style: &str) -> Result<()> {
        if keyword.trim().is_empty() {
            return Err(DiagError::validation("keyword", "keyword is empty"));
        }
        if style.trim().is_empty() {
            return Err(DiagError::validation("style", "style is empty"));
        }
        self.rules.set_style(keyword.trim(), Style::new(style.trim()));
        self.sessions.restyle_all();
        match self.sessions.refresh_now() {
            Ok(()) | Err(DiagError::NoFocusedSession) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ──────────────────── agent actions ────────────────────

    /// Validate the form, then probe from the target. Nothing is dispatched
    /// when validation fails.
    pub fn check_port(&self, host: &str, port: &str, protocol: &str) -> Result<()> {
        let check = parse_port_check(host, port, protocol)?;
        self.run(
            catalog::port_probe(check.protocol, &check.host, check.port, self.config.probe_timeout()),
            FollowUp::None,
        );
        Ok(())
    }

    pub fn restart_service(&self) {
        self.run(
            catalog::restart_service(&self.config.agent),
            FollowUp::RefreshStatus(StatusField::Service),
        );
    }

    pub fn clear_site_cache(&self) {
        self.run(catalog::clear_site_cache(&self.config.agent), FollowUp::None);
    }

    pub fn clear_agent_cache(&self) {
        self.run(catalog::clear_agent_cache(&self.config.agent), FollowUp::None);
    }

    pub fn refresh_status(&self) -> Result<()> {
        match &self.poller {
            Some(poller) => poller.refresh_all(),
            None => Ok(()),
        }
    }

    /// Flip the throttling-exempt setting on a worker thread.
    pub fn toggle_throttle(&self) -> Result<()> {
        let snapshot = self.dispatcher.selector().snapshot();
        let action = "toggle throttling".to_string();
        let target = snapshot.target.label().to_string();
        let _ = self.tx.send(UiEvent::Dispatch {
            status: DispatchStatus::InProgress {
                action: action.clone(),
                target: target.clone(),
            },
            follow_up: FollowUp::SetThrottle,
        });

        let tx = self.tx.clone();
        let dispatcher = self.dispatcher.clone();
        let config = Arc::clone(&self.config);
        let toggler = Arc::clone(&self.throttle);
        let generation = snapshot.generation;
        thread::Builder::new()
            .name("bfx-throttle".to_string())
            .spawn(move || {
                let status = match toggler.toggle(&dispatcher, &config.agent) {
                    Ok(output) => DispatchStatus::Completed {
                        action,
                        target,
                        generation,
                        output,
                    },
                    Err(error) => DispatchStatus::Failed {
                        action,
                        target,
                        generation,
                        error,
                    },
                };
                let _ = tx.send(UiEvent::Dispatch {
                    status,
                    follow_up: FollowUp::SetThrottle,
                });
            })
            .map(|_| ())
            .map_err(|e| DiagError::Runtime {
                details: format!("failed to spawn throttle worker: {e}"),
            })
    }

    /// Stop pollers and tickers.
    pub fn shutdown(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.sessions.close_all();
    }
}
