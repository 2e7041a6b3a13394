//! Events delivered from worker threads to the dashboard loop.

#![allow(missing_docs)]

use crate::dispatch::dispatcher::DispatchStatus;
use crate::session::scheduler::TickReport;
use crate::status::poller::StatusReport;
use crate::status::snapshot::StatusField;

/// What the loop does with a completed dispatch's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    None,
    /// Output is a path; open it as a file session.
    OpenFile,
    /// Re-run one status check.
    RefreshStatus(StatusField),
    /// Output is the throttle value just written.
    SetThrottle,
}

#[derive(Debug)]
pub enum UiEvent {
    Tick(TickReport),
    Status(StatusReport),
    Dispatch {
        status: DispatchStatus,
        follow_up: FollowUp,
    },
}
