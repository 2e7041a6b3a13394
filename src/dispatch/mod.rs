//! Dual-mode command dispatch: local procedures or remote WS-Man commands.

pub mod action;
pub mod catalog;
pub mod dispatcher;
pub mod remote;
pub mod target;
