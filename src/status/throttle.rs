//! Throttling-exempt toggle: read the current value, write its opposite.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::AgentConfig;
use crate::core::errors::Result;
use crate::dispatch::catalog;
use crate::dispatch::dispatcher::Dispatcher;
use crate::logger::activity::ActivityEvent;

/// `YES` becomes `NO`; anything else, including a missing value, becomes `YES`.
#[must_use]
pub fn flipped(current: &str) -> &'static str {
    if current.trim().eq_ignore_ascii_case("YES") {
        "NO"
    } else {
        "YES"
    }
}

/// Serializes read-then-write per target so two toggles on the same host
/// cannot interleave.
#[derive(Default)]
pub struct ThrottleToggler {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ThrottleToggler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, target: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(target.to_ascii_lowercase()).or_default())
    }

    /// Toggle on the current target and return the value written.
    pub fn toggle(&self, dispatcher: &Dispatcher, agent: &AgentConfig) -> Result<String> {
        let snapshot = dispatcher.selector().snapshot();
        let label = snapshot.target.label().to_string();
        let lock = self.lock_for(&label);
        let _guard = lock.lock();

        let current = match dispatcher.execute_on(
            &catalog::read_setting(agent, &agent.throttle_key),
            &snapshot.target,
        ) {
            Ok(value) => value,
            Err(e) if e.is_not_found() => String::new(),
            Err(e) => return Err(e),
        };
        let next = flipped(&current);
        dispatcher.execute_on(
            &catalog::write_setting(agent, &agent.throttle_key, next),
            &snapshot.target,
        )?;
        dispatcher.logger().send(ActivityEvent::ThrottleToggled {
            target: label,
            value: next.to_string(),
        });
        Ok(next.to_string())
    }
}
