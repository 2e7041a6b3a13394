//! Status poller: recurring checks on their own cadence plus on-demand ones.
//!
//! Service state, both agent ports and the relay pair re-arm on a fixed
//! period, each on its own thread, so a slow probe never delays the others.
//! Version, throttle, subsidiary and workstation identity run once at start
//! and again only when asked.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};

use crate::core::config::Config;
use crate::core::errors::{DiagError, Result};
use crate::dispatch::action::Action;
use crate::dispatch::catalog;
use crate::dispatch::dispatcher::Dispatcher;
use crate::logger::activity::ActivityEvent;
use crate::session::scheduler::CancelToken;
use crate::status::probe::Protocol;
use crate::status::snapshot::{StatusField, StatusUpdate};

#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Target generation the check ran against.
    pub generation: u64,
    pub update: StatusUpdate,
}

pub type StatusSink = Arc<dyn Fn(StatusReport) + Send + Sync>;

/// Re-arm period of a recurring field; `None` for on-demand fields.
#[must_use]
pub fn cadence(field: StatusField, config: &Config) -> Option<Duration> {
    let ms = match field {
        StatusField::Service => config.status.service_interval_ms,
        StatusField::TcpPort | StatusField::UdpPort => config.status.port_interval_ms,
        StatusField::Relay => config.status.relay_interval_ms,
        StatusField::Throttle
        | StatusField::Subsidiary
        | StatusField::Version
        | StatusField::Workstation => return None,
    };
    Some(Duration::from_millis(ms))
}

#[must_use]
pub fn check_action(field: StatusField, config: &Config) -> Action {
    let agent = &config.agent;
    let probe = |protocol| {
        catalog::port_probe(
            protocol,
            &config.status.probe_host,
            config.status.agent_port,
            config.probe_timeout(),
        )
    };
    match field {
        StatusField::Service => catalog::service_status(agent),
        StatusField::TcpPort => probe(Protocol::Tcp),
        StatusField::UdpPort => probe(Protocol::Udp),
        StatusField::Relay => catalog::relay_servers(agent),
        StatusField::Throttle => catalog::read_setting(agent, &agent.throttle_key),
        StatusField::Subsidiary => catalog::read_setting(agent, &agent.subsidiary_key),
        StatusField::Version => catalog::agent_version(agent),
        StatusField::Workstation => catalog::workstation_info(),
    }
}

/// Run one check synchronously against the current target.
pub fn run_check(field: StatusField, dispatcher: &Dispatcher, config: &Config) -> StatusReport {
    let snapshot = dispatcher.selector().snapshot();
    let output = dispatcher.execute_on(&check_action(field, config), &snapshot.target);
    let update = StatusUpdate::parse(field, output);
    if let Some(message) = update.error() {
        dispatcher.logger().send(ActivityEvent::StatusCheckFailed {
            field: field.as_str(),
            message: message.to_string(),
        });
    }
    StatusReport {
        generation: snapshot.generation,
        update,
    }
}

/// Run every check once, in panel order.
pub fn run_all(dispatcher: &Dispatcher, config: &Config) -> Vec<StatusReport> {
    StatusField::ALL
        .iter()
        .map(|f| run_check(*f, dispatcher, config))
        .collect()
}

struct Worker {
    field: StatusField,
    wake: Sender<()>,
    token: CancelToken,
    _join: JoinHandle<()>,
}

pub struct StatusPoller {
    workers: Vec<Worker>,
    dispatcher: Dispatcher,
    config: Arc<Config>,
    sink: StatusSink,
}

impl StatusPoller {
    /// Start recurring workers and run each on-demand check once.
    pub fn start(dispatcher: Dispatcher, config: Arc<Config>, sink: StatusSink) -> Result<Self> {
        let mut poller = Self {
            workers: Vec::new(),
            dispatcher,
            config,
            sink,
        };
        for field in StatusField::ALL {
            match cadence(field, &poller.config) {
                Some(period) => {
                    let worker = poller.spawn_worker(field, period)?;
                    poller.workers.push(worker);
                }
                None => poller.spawn_once(field)?,
            }
        }
        Ok(poller)
    }

    fn spawn_worker(&self, field: StatusField, period: Duration) -> Result<Worker> {
        let (wake, rx) = bounded(1);
        let token = CancelToken::new();
        let thread_token = token.clone();
        let dispatcher = self.dispatcher.clone();
        let config = Arc::clone(&self.config);
        let sink = Arc::clone(&self.sink);
        let join = thread::Builder::new()
            .name(format!("bfx-status-{}", field.as_str()))
            .spawn(move || poll_loop(field, period, &dispatcher, &config, &sink, &thread_token, &rx))
            .map_err(|e| DiagError::Runtime {
                details: format!("failed to spawn status worker: {e}"),
            })?;
        Ok(Worker {
            field,
            wake,
            token,
            _join: join,
        })
    }

    fn spawn_once(&self, field: StatusField) -> Result<()> {
        let dispatcher = self.dispatcher.clone();
        let config = Arc::clone(&self.config);
        let sink = Arc::clone(&self.sink);
        thread::Builder::new()
            .name(format!("bfx-status-{}", field.as_str()))
            .spawn(move || (*sink)(run_check(field, &dispatcher, &config)))
            .map(|_| ())
            .map_err(|e| DiagError::Runtime {
                details: format!("failed to spawn status check: {e}"),
            })
    }

    /// Re-run one field now, off the caller's thread.
    pub fn refresh(&self, field: StatusField) -> Result<()> {
        if let Some(worker) = self.workers.iter().find(|w| w.field == field) {
            return match worker.wake.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => Ok(()),
                Err(TrySendError::Disconnected(())) => Err(DiagError::ChannelClosed {
                    component: "status poller",
                }),
            };
        }
        self.spawn_once(field)
    }

    pub fn refresh_all(&self) -> Result<()> {
        for field in StatusField::ALL {
            self.refresh(field)?;
        }
        Ok(())
    }

    pub fn stop(&self) {
        for worker in &self.workers {
            worker.token.cancel();
            let _ = worker.wake.try_send(());
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(
    field: StatusField,
    period: Duration,
    dispatcher: &Dispatcher,
    config: &Config,
    sink: &StatusSink,
    token: &CancelToken,
    wake: &Receiver<()>,
) {
    loop {
        if token.is_cancelled() {
            break;
        }
        let report = run_check(field, dispatcher, config);
        if token.is_cancelled() {
            break;
        }
        (**sink)(report);
        select! {
            recv(wake) -> msg => if msg.is_err() { break },
            default(period) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::action::LocalContext;
    use crate::dispatch::remote::{RecordingTransport, RemoteTransport};
    use crate::dispatch::target::TargetSelector;
    use crate::logger::activity::ActivityLoggerHandle;
    use crate::platform::pal::{MockPlatform, ServiceState};
    use crate::status::snapshot::{FieldValue, StatusSnapshot};
    use crossbeam_channel::unbounded;
    use std::collections::HashSet;

    fn dispatcher(config: &Arc<Config>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(TargetSelector::new()),
            LocalContext {
                platform: Arc::new(MockPlatform::new()),
                config: Arc::clone(config),
            },
            Arc::new(RecordingTransport::new()) as Arc<dyn RemoteTransport>,
            ActivityLoggerHandle::disconnected(),
        )
    }

    #[test]
    fn recurring_and_on_demand_split() {
        let config = Config::default();
        assert!(cadence(StatusField::Service, &config).is_some());
        assert!(cadence(StatusField::Relay, &config).is_some());
        assert!(cadence(StatusField::Version, &config).is_none());
        assert!(cadence(StatusField::Throttle, &config).is_none());
    }

    #[test]
    fn run_all_on_mock_platform() {
        let config = Arc::new(Config::default());
        let d = dispatcher(&config);
        let mut snap = StatusSnapshot::default();
        for report in run_all(&d, &config) {
            assert_eq!(report.generation, 0);
            snap.apply(report.update);
        }
        assert_eq!(snap.service, FieldValue::Value(ServiceState::Running));
        assert_eq!(snap.throttle, FieldValue::NotFound);
        assert_eq!(snap.relay, FieldValue::NotFound);
        assert_eq!(snap.workstation.value().unwrap().hostname, "mock-workstation");
    }

    #[test]
    fn poller_reports_every_field() {
        let mut config = Config::default();
        config.status.probe_timeout_ms = 100;
        let config = Arc::new(config);
        let (tx, rx) = unbounded();
        let sink: StatusSink = Arc::new(move |r: StatusReport| {
            let _ = tx.send(r);
        });
        let poller = StatusPoller::start(dispatcher(&config), Arc::clone(&config), sink).unwrap();

        let mut seen = HashSet::new();
        while seen.len() < StatusField::ALL.len() {
            let report = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            seen.insert(report.update.field());
        }
        poller.refresh(StatusField::Version).unwrap();
        let again = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(StatusField::ALL.contains(&again.update.field()));
        poller.stop();
    }
}
