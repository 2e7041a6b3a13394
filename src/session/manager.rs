//! Open sessions, focus, and application of tick results.
//!
//! Owned by the UI loop. Tickers run on their own threads and hand their
//! reports back through a [`TickSink`]; the loop calls
//! [`SessionManager::apply_tick`] so buffers are only ever mutated here.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::core::config::RefreshConfig;
use crate::core::errors::{DiagError, Result};
use crate::dispatch::catalog;
use crate::dispatch::dispatcher::Dispatcher;
use crate::logger::activity::ActivityEvent;
use crate::session::scheduler::{TickReport, TickSink, Ticker, TickerPlan};
use crate::session::source::SourceKind;
use crate::session::view::SessionView;
use crate::text::highlight::SharedRules;
use crate::text::search::Layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What [`SessionManager::apply_tick`] did with a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickApplied {
    Updated,
    /// The tick failed; the message is recorded on the session view.
    Failed { message: String, rearmed: bool },
    /// Closed session, cancelled token or stale target generation.
    Discarded,
}

struct Session {
    kind: SourceKind,
    path: String,
    view: SessionView,
    ticker: Ticker,
}

pub struct SessionManager {
    sessions: BTreeMap<SessionId, Session>,
    focused: Option<SessionId>,
    next_id: u64,
    dispatcher: Dispatcher,
    rules: SharedRules,
    refresh: RefreshConfig,
    auto_refresh: Arc<AtomicBool>,
    sink: TickSink,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        rules: SharedRules,
        refresh: RefreshConfig,
        sink: TickSink,
    ) -> Self {
        let auto_refresh = Arc::new(AtomicBool::new(refresh.auto_refresh));
        Self {
            sessions: BTreeMap::new(),
            focused: None,
            next_id: 1,
            dispatcher,
            rules,
            refresh,
            auto_refresh,
            sink,
        }
    }

    /// Open a file session; it becomes focused. In local mode a missing
    /// file is rejected here; in remote mode the first tick reports it.
    pub fn open_file(&mut self, path: &str) -> Result<SessionId> {
        self.open(SourceKind::File, path)
    }

    /// Open a directory session; it becomes focused.
    pub fn open_directory(&mut self, path: &str) -> Result<SessionId> {
        self.open(SourceKind::Directory, path)
    }

    fn open(&mut self, kind: SourceKind, path: &str) -> Result<SessionId> {
        let path = path.trim();
        if path.is_empty() {
            return Err(DiagError::validation("path", "path is empty"));
        }
        if !self.dispatcher.selector().snapshot().target.is_remote() {
            let p = Path::new(path);
            let present = match kind {
                SourceKind::File => p.is_file(),
                SourceKind::Directory => p.is_dir(),
            };
            if !present {
                return Err(DiagError::not_found(format!("{kind} {path}")));
            }
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        let ticker = self.spawn_ticker(id, kind, path)?;
        let capacity = self.capacity(kind);
        self.sessions.insert(
            id,
            Session {
                kind,
                path: path.to_string(),
                view: SessionView::new(kind, capacity),
                ticker,
            },
        );
        self.focused = Some(id);
        self.dispatcher.logger().send(ActivityEvent::SessionOpened {
            session: id.get(),
            path: path.to_string(),
            kind: kind.as_str(),
        });
        Ok(id)
    }

    fn capacity(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::File => self.refresh.file_buffer_lines,
            SourceKind::Directory => self.refresh.directory_entries,
        }
    }

    fn spawn_ticker(&self, id: SessionId, kind: SourceKind, path: &str) -> Result<Ticker> {
        let (action, period) = match kind {
            SourceKind::File => (
                catalog::tail_file(path, self.refresh.file_buffer_lines),
                Duration::from_millis(self.refresh.file_interval_ms),
            ),
            SourceKind::Directory => (
                catalog::list_directory(path, self.refresh.directory_entries),
                Duration::from_millis(self.refresh.directory_interval_ms),
            ),
        };
        Ticker::spawn(
            TickerPlan {
                session: id,
                path: path.to_string(),
                action,
                period,
            },
            self.dispatcher.clone(),
            Arc::clone(&self.auto_refresh),
            Arc::clone(&self.sink),
        )
    }

    /// Close a session and cancel its ticker. Focus moves to the most
    /// recently opened remaining session.
    pub fn close(&mut self, id: SessionId) -> Result<()> {
        let session = self
            .sessions
            .remove(&id)
            .ok_or(DiagError::UnknownSession { id: id.get() })?;
        session.ticker.cancel();
        if self.focused == Some(id) {
            self.focused = self.sessions.keys().next_back().copied();
        }
        self.dispatcher.logger().send(ActivityEvent::SessionClosed {
            session: id.get(),
            path: session.path,
        });
        Ok(())
    }

    pub fn close_all(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            let _ = self.close(id);
        }
    }

    pub fn focus(&mut self, id: SessionId) -> Result<()> {
        if !self.sessions.contains_key(&id) {
            return Err(DiagError::UnknownSession { id: id.get() });
        }
        self.focused = Some(id);
        Ok(())
    }

    #[must_use]
    pub const fn focused(&self) -> Option<SessionId> {
        self.focused
    }

    /// Open sessions in opening order.
    #[must_use]
    pub fn list_open(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    #[must_use]
    pub fn view(&self, id: SessionId) -> Option<&SessionView> {
        self.sessions.get(&id).map(|s| &s.view)
    }

    #[must_use]
    pub fn path(&self, id: SessionId) -> Option<&str> {
        self.sessions.get(&id).map(|s| s.path.as_str())
    }

    #[must_use]
    pub fn kind(&self, id: SessionId) -> Option<SourceKind> {
        self.sessions.get(&id).map(|s| s.kind)
    }

    /// Short tab label: the last path component.
    #[must_use]
    pub fn title(&self, id: SessionId) -> Option<String> {
        self.path(id).map(|p| {
            p.trim_end_matches(['/', '\\'])
                .rsplit(['/', '\\'])
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or(p)
                .to_string()
        })
    }

    /// Whether the session's ticker is still re-arming.
    #[must_use]
    pub fn is_live(&self, id: SessionId) -> bool {
        self.sessions.get(&id).is_some_and(|s| s.ticker.is_running())
    }

    pub fn apply_tick(&mut self, report: TickReport) -> TickApplied {
        let current_generation = self.dispatcher.selector().generation();
        let Some(session) = self.sessions.get_mut(&report.session) else {
            return TickApplied::Discarded;
        };
        if report.token.is_cancelled()
            || !report.token.same_as(session.ticker.token())
            || report.generation != current_generation
        {
            return TickApplied::Discarded;
        }
        let rearmed = !report.stopped_ticker();
        match report.outcome {
            Ok(text) => {
                let rules = self.rules.snapshot();
                session.view.replace(&text, &rules);
                TickApplied::Updated
            }
            Err(e) => {
                let message = e.to_string();
                session.view.record_error(message.clone());
                TickApplied::Failed { message, rearmed }
            }
        }
    }

    fn focused_session(&mut self) -> Result<&mut Session> {
        let id = self.focused.ok_or(DiagError::NoFocusedSession)?;
        self.sessions
            .get_mut(&id)
            .ok_or(DiagError::UnknownSession { id: id.get() })
    }

    /// Highlight every occurrence of `term` in the focused session; returns
    /// the match count. An empty term clears the search layer.
    pub fn search(&mut self, term: &str) -> Result<usize> {
        Ok(self.focused_session()?.view.set_layer(Layer::Search, term).len())
    }

    /// Same as [`SessionManager::search`] on the independent filter layer.
    pub fn filter(&mut self, term: &str) -> Result<usize> {
        Ok(self.focused_session()?.view.set_layer(Layer::Filter, term).len())
    }

    /// Empty the focused buffer; the next tick repopulates it.
    pub fn clear(&mut self) -> Result<()> {
        self.focused_session()?.view.clear();
        Ok(())
    }

    pub fn save(&mut self, dest: &Path) -> Result<()> {
        self.focused_session()?.view.save(dest)
    }

    /// Force one tick of the focused session. A ticker that stopped after
    /// its source vanished is restarted.
    pub fn refresh_now(&mut self) -> Result<()> {
        let id = self.focused.ok_or(DiagError::NoFocusedSession)?;
        self.refresh_session(id)
    }

    fn refresh_session(&mut self, id: SessionId) -> Result<()> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(DiagError::UnknownSession { id: id.get() })?;
        if session.ticker.force_tick() {
            return Ok(());
        }
        let (kind, path) = (session.kind, session.path.clone());
        let ticker = self.spawn_ticker(id, kind, &path)?;
        if let Some(session) = self.sessions.get_mut(&id) {
            session.ticker.cancel();
            session.ticker = ticker;
        }
        Ok(())
    }

    /// Force one tick on every open session.
    pub fn refresh_all(&mut self) -> Result<()> {
        for id in self.list_open() {
            self.refresh_session(id)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh.load(Ordering::Acquire)
    }

    /// Toggle periodic ticks. Manual refreshes always work.
    pub fn set_auto_refresh(&mut self, enabled: bool) -> Result<()> {
        let was = self.auto_refresh.swap(enabled, Ordering::AcqRel);
        if enabled && !was && self.refresh.force_tick_on_resume {
            self.refresh_all()?;
        }
        Ok(())
    }

    /// Re-run highlight classification on every buffer after a rule change.
    pub fn restyle_all(&mut self) {
        let rules = self.rules.snapshot();
        for session in self.sessions.values_mut() {
            session.view.restyle(&rules);
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        for session in self.sessions.values() {
            session.ticker.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::dispatch::action::LocalContext;
    use crate::dispatch::remote::{RecordingTransport, RemoteTransport};
    use crate::dispatch::target::{Secret, TargetSelector};
    use crate::logger::activity::ActivityLoggerHandle;
    use crate::platform::pal::MockPlatform;
    use crate::text::highlight::HighlightRules;
    use crossbeam_channel::{Receiver, unbounded};
    use std::fs;

    const WAIT: Duration = Duration::from_secs(5);

    fn manager() -> (SessionManager, Receiver<TickReport>) {
        let dispatcher = Dispatcher::new(
            Arc::new(TargetSelector::new()),
            LocalContext {
                platform: Arc::new(MockPlatform::new()),
                config: Arc::new(Config::default()),
            },
            Arc::new(RecordingTransport::new()) as Arc<dyn RemoteTransport>,
            ActivityLoggerHandle::disconnected(),
        );
        let (tx, rx) = unbounded();
        let sink: TickSink = Arc::new(move |report: TickReport| {
            let _ = tx.send(report);
        });
        let rules = SharedRules::new(HighlightRules::from_config(&Config::default().highlight));
        let refresh = RefreshConfig {
            file_interval_ms: 60_000,
            directory_interval_ms: 60_000,
            ..RefreshConfig::default()
        };
        (SessionManager::new(dispatcher, rules, refresh, sink), rx)
    }

    #[test]
    fn missing_local_file_is_rejected() {
        let (mut mgr, _rx) = manager();
        let err = mgr.open_file("/definitely/not/here.log").unwrap_err();
        assert!(err.is_not_found());
        assert!(mgr.list_open().is_empty());
        assert!(mgr.focused().is_none());
    }

    #[test]
    fn first_tick_fills_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("BESClient.log");
        fs::write(&file, "started\nERROR boom\n").unwrap();
        let (mut mgr, rx) = manager();
        let id = mgr.open_file(file.to_str().unwrap()).unwrap();
        assert_eq!(mgr.focused(), Some(id));
        assert_eq!(mgr.title(id).as_deref(), Some("BESClient.log"));

        let report = rx.recv_timeout(WAIT).unwrap();
        assert!(report.forced);
        assert_eq!(mgr.apply_tick(report), TickApplied::Updated);
        assert_eq!(mgr.view(id).unwrap().text(), "started\nERROR boom");
        assert_eq!(mgr.search("boom").unwrap(), 1);
    }

    #[test]
    fn reports_for_closed_sessions_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.log");
        fs::write(&file, "x\n").unwrap();
        let (mut mgr, rx) = manager();
        let id = mgr.open_file(file.to_str().unwrap()).unwrap();
        let report = rx.recv_timeout(WAIT).unwrap();
        mgr.close(id).unwrap();
        assert_eq!(mgr.apply_tick(report), TickApplied::Discarded);
        assert!(mgr.view(id).is_none());
        assert!(matches!(mgr.close(id), Err(DiagError::UnknownSession { .. })));
    }

    #[test]
    fn reports_from_an_old_target_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.log");
        fs::write(&file, "x\n").unwrap();
        let (mut mgr, rx) = manager();
        let id = mgr.open_file(file.to_str().unwrap()).unwrap();
        let report = rx.recv_timeout(WAIT).unwrap();
        mgr.dispatcher
            .selector()
            .set_remote("ws01", "admin", Secret::new("pw"))
            .unwrap();
        assert_eq!(mgr.apply_tick(report), TickApplied::Discarded);
        assert_eq!(mgr.view(id).unwrap().refresh_count(), 0);
    }

    #[test]
    fn focus_follows_open_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let (mut mgr, _rx) = manager();
        assert!(matches!(mgr.search("x"), Err(DiagError::NoFocusedSession)));

        let a = mgr.open_directory(dir.path().to_str().unwrap()).unwrap();
        let file = dir.path().join("b.log");
        fs::write(&file, "").unwrap();
        let b = mgr.open_file(file.to_str().unwrap()).unwrap();
        assert_eq!(mgr.list_open(), vec![a, b]);
        assert_eq!(mgr.focused(), Some(b));

        mgr.close(b).unwrap();
        assert_eq!(mgr.focused(), Some(a));
        mgr.focus(a).unwrap();
        mgr.close_all();
        assert!(mgr.focused().is_none());
    }
}
