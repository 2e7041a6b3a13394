//! Activity logging: JSONL append-only file fed by a background thread.

pub mod activity;
pub mod jsonl;
