//! A diagnostic action: a local procedure paired with its remote command.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::platform::pal::Platform;

/// Printed by remote commands when the path, key or value they look up is
/// absent. The dispatcher turns it into [`crate::core::errors::DiagError::NotFound`].
pub const NOT_FOUND_SENTINEL: &str = "__NOT_FOUND__";

/// What a local procedure may touch.
#[derive(Clone)]
pub struct LocalContext {
    pub platform: Arc<dyn Platform>,
    pub config: Arc<Config>,
}

pub type LocalProcedure = Arc<dyn Fn(&LocalContext) -> Result<String> + Send + Sync>;

/// Literal command text executed by the remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
pub struct Action {
    name: String,
    local: LocalProcedure,
    remote: CommandTemplate,
}

impl Action {
    pub fn new<F>(name: impl Into<String>, local: F, remote: CommandTemplate) -> Self
    where
        F: Fn(&LocalContext) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            local: Arc::new(local),
            remote,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn remote(&self) -> &CommandTemplate {
        &self.remote
    }

    pub fn run_local(&self, ctx: &LocalContext) -> Result<String> {
        (self.local)(ctx)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Quote `value` as a PowerShell single-quoted literal.
#[must_use]
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_quote_doubles_single_quotes() {
        assert_eq!(ps_quote(r"C:\it's\here"), r"'C:\it''s\here'");
    }
}
