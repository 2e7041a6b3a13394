//! Platform abstraction: service control, registry, host identity.

pub mod pal;
pub mod registry;
