//! Agent health panel: probes, parsed snapshot, poller and throttle toggle.

pub mod poller;
pub mod probe;
pub mod snapshot;
pub mod throttle;
