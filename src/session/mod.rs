//! Monitoring sessions: sources, bounded views, tickers and their manager.

pub mod manager;
pub mod scheduler;
pub mod source;
pub mod view;
