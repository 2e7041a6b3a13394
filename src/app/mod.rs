//! Dashboard state machine driven by worker events.

pub mod dashboard;
pub mod event;
