//! Command dispatcher: routes an [`Action`] to its local procedure or to the
//! remote transport according to the current execution target.
//!
//! `dispatch*` calls never block the caller: work runs on a worker thread and
//! progress is reported through a channel or callback.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};

use crate::core::errors::{DiagError, Result};
use crate::dispatch::action::{Action, LocalContext, NOT_FOUND_SENTINEL};
use crate::dispatch::remote::RemoteTransport;
use crate::dispatch::target::{ExecutionTarget, TargetSelector, TargetSnapshot};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// Progress of one dispatched action.
#[derive(Debug)]
pub enum DispatchStatus {
    InProgress {
        action: String,
        target: String,
    },
    Completed {
        action: String,
        target: String,
        generation: u64,
        output: String,
    },
    Failed {
        action: String,
        target: String,
        generation: u64,
        error: DiagError,
    },
}

impl DispatchStatus {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress { .. })
    }

    #[must_use]
    pub fn action(&self) -> &str {
        match self {
            Self::InProgress { action, .. }
            | Self::Completed { action, .. }
            | Self::Failed { action, .. } => action,
        }
    }
}

/// Receiving end of one dispatch.
pub struct DispatchHandle {
    rx: Receiver<DispatchStatus>,
}

impl DispatchHandle {
    #[must_use]
    pub const fn receiver(&self) -> &Receiver<DispatchStatus> {
        &self.rx
    }

    /// Block until the action finishes.
    pub fn wait(self) -> Result<String> {
        loop {
            match self.rx.recv() {
                Ok(DispatchStatus::InProgress { .. }) => {}
                Ok(DispatchStatus::Completed { output, .. }) => return Ok(output),
                Ok(DispatchStatus::Failed { error, .. }) => return Err(error),
                Err(_) => return Err(DiagError::ChannelClosed { component: "dispatch" }),
            }
        }
    }

    /// Like [`DispatchHandle::wait`] with an upper bound; `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(DispatchStatus::InProgress { .. }) => {}
                Ok(DispatchStatus::Completed { output, .. }) => return Some(Ok(output)),
                Ok(DispatchStatus::Failed { error, .. }) => return Some(Err(error)),
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    return Some(Err(DiagError::ChannelClosed { component: "dispatch" }));
                }
            }
        }
    }
}

struct DispatcherInner {
    selector: Arc<TargetSelector>,
    local: LocalContext,
    transport: Arc<dyn RemoteTransport>,
    logger: ActivityLoggerHandle,
}

/// Cheaply cloneable; all clones share the same target selector.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        selector: Arc<TargetSelector>,
        local: LocalContext,
        transport: Arc<dyn RemoteTransport>,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                selector,
                local,
                transport,
                logger,
            }),
        }
    }

    #[must_use]
    pub fn selector(&self) -> &Arc<TargetSelector> {
        &self.inner.selector
    }

    #[must_use]
    pub fn local_context(&self) -> &LocalContext {
        &self.inner.local
    }

    #[must_use]
    pub fn logger(&self) -> &ActivityLoggerHandle {
        &self.inner.logger
    }

    /// Run synchronously against the current target.
    pub fn execute(&self, action: &Action) -> Result<String> {
        let snapshot = self.inner.selector.snapshot();
        self.execute_on(action, &snapshot.target)
    }

    /// Run synchronously against an explicit target. Local never touches the
    /// transport; remote never runs the local procedure.
    pub fn execute_on(&self, action: &Action, target: &ExecutionTarget) -> Result<String> {
        match target {
            ExecutionTarget::Local => action.run_local(&self.inner.local),
            ExecutionTarget::Remote(remote) => {
                let output = self.inner.transport.run(remote, action.remote().text())?;
                if output.lines().any(|l| l.trim() == NOT_FOUND_SENTINEL) {
                    return Err(DiagError::not_found(format!(
                        "{} on {}",
                        action.name(),
                        remote.host
                    )));
                }
                Ok(output)
            }
        }
    }

    /// Run on a worker thread; statuses arrive on the returned handle.
    pub fn dispatch(&self, action: Action) -> DispatchHandle {
        let (tx, rx) = unbounded();
        self.dispatch_with(action, move |status| {
            let _ = tx.send(status);
        });
        DispatchHandle { rx }
    }

    /// Run on a worker thread, reporting through `notify`. `InProgress` is
    /// delivered before this returns.
    pub fn dispatch_with<F>(&self, action: Action, notify: F)
    where
        F: Fn(DispatchStatus) + Send + Sync + 'static,
    {
        let snapshot = self.inner.selector.snapshot();
        let notify = Arc::new(notify);
        (*notify)(DispatchStatus::InProgress {
            action: action.name().to_string(),
            target: snapshot.target.label().to_string(),
        });

        let this = self.clone();
        let worker_notify = Arc::clone(&notify);
        let worker_snapshot = Arc::clone(&snapshot);
        let name = action.name().to_string();
        let spawned = thread::Builder::new()
            .name("bfx-dispatch".to_string())
            .spawn(move || {
                let status = this.run_and_log(&action, &worker_snapshot);
                (*worker_notify)(status);
            });

        if let Err(e) = spawned {
            let error = DiagError::Runtime {
                details: format!("failed to spawn dispatch worker: {e}"),
            };
            eprintln!("[BFX-DISPATCH] {name}: {error}");
            self.inner.logger.send(ActivityEvent::Error {
                code: error.code().to_string(),
                message: error.to_string(),
            });
            (*notify)(DispatchStatus::Failed {
                action: name,
                target: snapshot.target.label().to_string(),
                generation: snapshot.generation,
                error,
            });
        }
    }

    fn run_and_log(&self, action: &Action, snapshot: &TargetSnapshot) -> DispatchStatus {
        let started = Instant::now();
        let target = snapshot.target.label().to_string();
        match self.execute_on(action, &snapshot.target) {
            Ok(output) => {
                self.inner.logger.send(ActivityEvent::DispatchCompleted {
                    action: action.name().to_string(),
                    target: target.clone(),
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
                DispatchStatus::Completed {
                    action: action.name().to_string(),
                    target,
                    generation: snapshot.generation,
                    output,
                }
            }
            Err(error) => {
                self.inner.logger.send(ActivityEvent::DispatchFailed {
                    action: action.name().to_string(),
                    target: target.clone(),
                    code: error.code().to_string(),
                    message: error.to_string(),
                });
                DispatchStatus::Failed {
                    action: action.name().to_string(),
                    target,
                    generation: snapshot.generation,
                    error,
                }
            }
        }
    }
}
