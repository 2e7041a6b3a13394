//! Per-session refresh ticker.
//!
//! Each session gets one thread that re-reads its source every period. The
//! next wait only starts after the current tick has completed, so ticks of
//! one session never overlap. Closing a session cancels its token; a report
//! produced after cancellation is never applied.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};

use crate::core::errors::{DiagError, Result};
use crate::dispatch::action::Action;
use crate::dispatch::dispatcher::Dispatcher;
use crate::logger::activity::ActivityEvent;
use crate::session::manager::SessionId;

/// Shared cancellation flag for one session's ticker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same flag.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Result of one tick, delivered to the UI loop.
#[derive(Debug)]
pub struct TickReport {
    pub session: SessionId,
    pub token: CancelToken,
    /// Target generation the tick ran against.
    pub generation: u64,
    pub forced: bool,
    pub outcome: Result<String>,
}

impl TickReport {
    /// Whether the ticker stopped re-arming after this report.
    #[must_use]
    pub fn stopped_ticker(&self) -> bool {
        matches!(&self.outcome, Err(e) if e.is_not_found())
    }
}

pub type TickSink = Arc<dyn Fn(TickReport) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum Control {
    Wake,
}

pub struct TickerPlan {
    pub session: SessionId,
    pub path: String,
    pub action: Action,
    pub period: Duration,
}

/// Handle to a running ticker thread.
pub struct Ticker {
    control: Sender<Control>,
    token: CancelToken,
    /// Set by the thread before it delivers its final report.
    stopped: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl Ticker {
    /// Start the ticker. The first tick runs immediately.
    pub fn spawn(
        plan: TickerPlan,
        dispatcher: Dispatcher,
        auto_refresh: Arc<AtomicBool>,
        sink: TickSink,
    ) -> Result<Self> {
        // Capacity 1: repeated force requests while a tick runs coalesce.
        let (control, rx) = bounded(1);
        let token = CancelToken::new();
        let thread_token = token.clone();
        let stopped = Arc::new(AtomicBool::new(false));
        let thread_stopped = Arc::clone(&stopped);
        let join = thread::Builder::new()
            .name(format!("bfx-tick-{}", plan.session))
            .spawn(move || {
                run_ticker(
                    &plan,
                    &dispatcher,
                    &auto_refresh,
                    &sink,
                    &thread_token,
                    &thread_stopped,
                    &rx,
                );
                thread_stopped.store(true, Ordering::SeqCst);
            })
            .map_err(|e| DiagError::Runtime {
                details: format!("failed to spawn ticker: {e}"),
            })?;
        Ok(Self {
            control,
            token,
            stopped,
            join,
        })
    }

    /// Request one tick regardless of the auto-refresh flag. Returns `false`
    /// when the ticker has already stopped.
    pub fn force_tick(&self) -> bool {
        // Queue first, then look at the flag: a thread that is stopping sets
        // the flag before it drains the queue, so one of the two sees the wake.
        match self.control.try_send(Control::Wake) {
            Ok(()) | Err(TrySendError::Full(_)) => self.is_running(),
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
        let _ = self.control.try_send(Control::Wake);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && !self.join.is_finished()
    }

    #[must_use]
    pub const fn token(&self) -> &CancelToken {
        &self.token
    }
}

fn run_ticker(
    plan: &TickerPlan,
    dispatcher: &Dispatcher,
    auto_refresh: &AtomicBool,
    sink: &TickSink,
    token: &CancelToken,
    stopped: &AtomicBool,
    control: &Receiver<Control>,
) {
    let mut forced = true;
    loop {
        if !forced {
            select! {
                recv(control) -> msg => match msg {
                    Ok(Control::Wake) => forced = true,
                    Err(_) => break,
                },
                default(plan.period) => {}
            }
        }
        if token.is_cancelled() {
            break;
        }
        if !forced && !auto_refresh.load(Ordering::Acquire) {
            continue;
        }

        let snapshot = dispatcher.selector().snapshot();
        let outcome = dispatcher.execute_on(&plan.action, &snapshot.target);
        if token.is_cancelled() {
            break;
        }

        let report = TickReport {
            session: plan.session,
            token: token.clone(),
            generation: snapshot.generation,
            forced,
            outcome,
        };
        let stop = report.stopped_ticker();
        if stop {
            stopped.store(true, Ordering::SeqCst);
        }
        if let Err(e) = &report.outcome {
            dispatcher.logger().send(ActivityEvent::TickFailed {
                session: plan.session.get(),
                path: plan.path.clone(),
                code: e.code().to_string(),
                message: e.to_string(),
                rearmed: !stop,
            });
        }
        (**sink)(report);
        forced = false;
        if stop {
            // A refresh requested while this tick ran still gets its tick.
            if control.try_recv().is_ok() && !token.is_cancelled() {
                stopped.store(false, Ordering::SeqCst);
                forced = true;
                continue;
            }
            break;
        }
    }
}
