#![forbid(unsafe_code)]

//! bfxdiag: diagnostic dashboard engine for BigFix (BESClient) endpoints.
//!
//! Pieces, bottom-up:
//! 1. **Sessions**: tail files or watch directories on a per-session ticker
//!    with bounded buffers, keyword highlighting, search and filter layers.
//! 2. **Dispatch**: every diagnostic action runs locally or on a remote host
//!    over WS-Man, selected by one shared execution target.
//! 3. **Status**: service, port, relay, throttle and identity checks on
//!    independent cadences.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use bfxdiag::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use bfxdiag::core::config::Config;
//! use bfxdiag::session::manager::SessionManager;
//! ```

pub mod prelude;

pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
pub mod core;
pub mod dispatch;
pub mod logger;
pub mod platform;
pub mod session;
pub mod status;
pub mod text;
