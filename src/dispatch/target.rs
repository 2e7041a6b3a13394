//! Execution target: where diagnostic actions run.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::errors::{DiagError, Result};

/// Password for the remote host. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub host: String,
    pub username: String,
    pub secret: Secret,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionTarget {
    #[default]
    Local,
    Remote(RemoteHost),
}

impl ExecutionTarget {
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// `local` or the remote host name.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Remote(remote) => &remote.host,
        }
    }
}

/// An immutable view of the target as of one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSnapshot {
    /// Bumped on every set/clear; results tagged with an older generation
    /// are stale.
    pub generation: u64,
    pub target: ExecutionTarget,
}

/// Holds the current target behind snapshot swap: every dispatch reads one
/// consistent `Arc<TargetSnapshot>`.
#[derive(Debug)]
pub struct TargetSelector {
    current: RwLock<Arc<TargetSnapshot>>,
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetSelector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(TargetSnapshot {
                generation: 0,
                target: ExecutionTarget::Local,
            })),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<TargetSnapshot> {
        Arc::clone(&self.current.read())
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Switch to a remote host. Returns the new generation.
    pub fn set_remote(&self, host: &str, username: &str, secret: Secret) -> Result<u64> {
        let host = host.trim();
        if host.is_empty() {
            return Err(DiagError::validation("remote host", "host name is empty"));
        }
        if host.contains(char::is_whitespace) || host.contains('/') {
            return Err(DiagError::validation(
                "remote host",
                format!("{host:?} is not a host name"),
            ));
        }
        if username.trim().is_empty() {
            return Err(DiagError::validation("remote user", "user name is empty"));
        }
        Ok(self.swap(ExecutionTarget::Remote(RemoteHost {
            host: host.to_string(),
            username: username.trim().to_string(),
            secret,
        })))
    }

    /// Back to local execution. Returns the new generation.
    pub fn clear_remote(&self) -> u64 {
        self.swap(ExecutionTarget::Local)
    }

    fn swap(&self, target: ExecutionTarget) -> u64 {
        let mut guard = self.current.write();
        let generation = guard.generation + 1;
        *guard = Arc::new(TargetSnapshot { generation, target });
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_bump_generation() {
        let selector = TargetSelector::new();
        assert_eq!(selector.generation(), 0);
        let g1 = selector
            .set_remote("ws01.corp", "admin", Secret::new("pw"))
            .unwrap();
        assert_eq!(g1, 1);
        assert_eq!(selector.snapshot().target.label(), "ws01.corp");
        assert_eq!(selector.clear_remote(), 2);
        assert!(!selector.snapshot().target.is_remote());
    }

    #[test]
    fn invalid_remote_is_rejected_without_change() {
        let selector = TargetSelector::new();
        assert!(selector.set_remote("  ", "admin", Secret::new("pw")).is_err());
        assert!(selector.set_remote("host", "", Secret::new("pw")).is_err());
        assert!(
            selector
                .set_remote("http://host", "admin", Secret::new("pw"))
                .is_err()
        );
        assert_eq!(selector.generation(), 0);
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let target = ExecutionTarget::Remote(RemoteHost {
            host: "h".into(),
            username: "u".into(),
            secret: Secret::new("hunter2"),
        });
        assert!(!format!("{target:?}").contains("hunter2"));
    }

    #[test]
    fn snapshots_are_stable_across_swaps() {
        let selector = TargetSelector::new();
        let before = selector.snapshot();
        selector
            .set_remote("ws01", "admin", Secret::new("pw"))
            .unwrap();
        assert_eq!(before.target, ExecutionTarget::Local);
    }
}
