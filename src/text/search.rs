//! Case-insensitive search and filter spans over a rendered buffer.

#![allow(missing_docs)]

use regex::RegexBuilder;
use serde::Serialize;

/// Byte range `[start, end)` within line `line` of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Span {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

/// Which highlight layer a span set belongs to. The two layers never
/// overwrite each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Search,
    Filter,
}

/// A term together with the spans it produced on the current buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerState {
    pub term: String,
    pub spans: Vec<Span>,
}

/// Non-overlapping, leftmost-first, case-insensitive matches of `term`.
/// An empty term yields no spans.
#[must_use]
pub fn find_spans<S: AsRef<str>>(lines: &[S], term: &str) -> Vec<Span> {
    if term.is_empty() {
        return Vec::new();
    }
    let Ok(re) = RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
    else {
        return Vec::new();
    };
    lines
        .iter()
        .enumerate()
        .flat_map(|(idx, line)| {
            re.find_iter(line.as_ref())
                .map(move |m| Span {
                    line: idx,
                    start: m.start(),
                    end: m.end(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[must_use]
pub fn search<S: AsRef<str>>(lines: &[S], term: &str) -> Vec<Span> {
    find_spans(lines, term)
}

#[must_use]
pub fn filter<S: AsRef<str>>(lines: &[S], term: &str) -> Vec<Span> {
    find_spans(lines, term)
}
