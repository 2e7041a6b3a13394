//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use bfxdiag::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DiagError, Result};

// Platform
pub use crate::platform::pal::{Platform, ServiceState, detect_platform};
pub use crate::platform::registry::{RegType, RegValue, Registry};

// Dispatch
pub use crate::dispatch::action::{Action, LocalContext};
pub use crate::dispatch::dispatcher::{DispatchStatus, Dispatcher};
pub use crate::dispatch::remote::{RemoteTransport, WsmanTransport};
pub use crate::dispatch::target::{ExecutionTarget, Secret, TargetSelector};

// Sessions
pub use crate::session::manager::{SessionId, SessionManager};
pub use crate::session::scheduler::{TickReport, TickSink};
pub use crate::session::view::SessionView;

// Text
pub use crate::text::highlight::{HighlightRules, SharedRules, Style};
pub use crate::text::search::{Layer, Span};

// Status
pub use crate::status::poller::{StatusPoller, StatusReport};
pub use crate::status::snapshot::{FieldValue, StatusField, StatusSnapshot};

// App
pub use crate::app::dashboard::Dashboard;
