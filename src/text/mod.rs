//! Highlight, search and filter engine for displayed text.

pub mod highlight;
pub mod search;
