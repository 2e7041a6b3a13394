//! Bounded, styled line buffer of one session plus its search/filter layers.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};

use crate::core::errors::{DiagError, Result};
use crate::session::source::{SourceKind, output_lines};
use crate::text::highlight::{HighlightRules, Style, classify};
use crate::text::search::{Layer, LayerState, Span, filter, search};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledLine {
    pub text: String,
    pub style: Option<Style>,
}

#[derive(Debug, Clone)]
pub struct SessionView {
    kind: SourceKind,
    capacity: usize,
    lines: Vec<StyledLine>,
    search: LayerState,
    filter: LayerState,
    last_error: Option<String>,
    refreshed_at: Option<DateTime<Local>>,
    refresh_count: u64,
}

impl SessionView {
    #[must_use]
    pub fn new(kind: SourceKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            lines: Vec::new(),
            search: LayerState::default(),
            filter: LayerState::default(),
            last_error: None,
            refreshed_at: None,
            refresh_count: 0,
        }
    }

    /// Replace the buffer with freshly read content.
    ///
    /// File views keep the last `capacity` lines (most recent last);
    /// directory views keep the first `capacity` entries (newest first).
    pub fn replace(&mut self, raw: &str, rules: &HighlightRules) {
        let mut texts = output_lines(raw);
        if texts.len() > self.capacity {
            match self.kind {
                SourceKind::File => {
                    texts.drain(..texts.len() - self.capacity);
                }
                SourceKind::Directory => texts.truncate(self.capacity),
            }
        }
        self.lines = texts
            .into_iter()
            .map(|t| StyledLine {
                text: t.to_string(),
                style: classify(t, rules),
            })
            .collect();
        self.last_error = None;
        self.refreshed_at = Some(Local::now());
        self.refresh_count += 1;
        self.reapply_layers();
    }

    pub fn record_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    /// Empty the buffer until the next refresh. Layer terms are kept.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.reapply_layers();
    }

    /// Re-run classification with a new rule set.
    pub fn restyle(&mut self, rules: &HighlightRules) {
        for line in &mut self.lines {
            line.style = classify(&line.text, rules);
        }
    }

    /// Set one layer's term and return its spans. An empty term clears it.
    pub fn set_layer(&mut self, layer: Layer, term: &str) -> &[Span] {
        let texts = self.texts();
        let spans = match layer {
            Layer::Search => search(&texts, term),
            Layer::Filter => filter(&texts, term),
        };
        let state = self.layer_mut(layer);
        state.term = term.to_string();
        state.spans = spans;
        &state.spans
    }

    #[must_use]
    pub fn spans(&self, layer: Layer) -> &[Span] {
        match layer {
            Layer::Search => &self.search.spans,
            Layer::Filter => &self.filter.spans,
        }
    }

    #[must_use]
    pub fn term(&self, layer: Layer) -> &str {
        match layer {
            Layer::Search => &self.search.term,
            Layer::Filter => &self.filter.term,
        }
    }

    #[must_use]
    pub fn lines(&self) -> &[StyledLine] {
        &self.lines
    }

    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        self.kind
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub const fn refreshed_at(&self) -> Option<DateTime<Local>> {
        self.refreshed_at
    }

    #[must_use]
    pub const fn refresh_count(&self) -> u64 {
        self.refresh_count
    }

    /// The buffer as displayed, newline-joined.
    #[must_use]
    pub fn text(&self) -> String {
        self.texts().join("\n")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut body = self.text();
        body.push('\n');
        fs::write(path, body).map_err(|source| DiagError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }

    fn layer_mut(&mut self, layer: Layer) -> &mut LayerState {
        match layer {
            Layer::Search => &mut self.search,
            Layer::Filter => &mut self.filter,
        }
    }

    fn reapply_layers(&mut self) {
        for layer in [Layer::Search, Layer::Filter] {
            let term = self.term(layer).to_string();
            self.set_layer(layer, &term);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::HighlightConfig;

    fn rules() -> HighlightRules {
        HighlightRules::from_config(&HighlightConfig::default())
    }

    #[test]
    fn file_view_keeps_tail() {
        let mut view = SessionView::new(SourceKind::File, 3);
        view.replace("1\n2\nERROR 3\n4\n5", &rules());
        let texts: Vec<&str> = view.lines().iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["ERROR 3", "4", "5"]);
        assert_eq!(view.lines()[0].style, Some(Style::new("red")));
        assert_eq!(view.refresh_count(), 1);
    }

    #[test]
    fn directory_view_keeps_head() {
        let mut view = SessionView::new(SourceKind::Directory, 2);
        view.replace("newest\nmiddle\noldest", &rules());
        assert_eq!(view.text(), "newest\nmiddle");
    }

    #[test]
    fn layers_are_independent_and_survive_refresh() {
        let mut view = SessionView::new(SourceKind::File, 100);
        view.replace("alpha beta\nbeta gamma", &rules());
        assert_eq!(view.set_layer(Layer::Search, "BETA").len(), 2);
        assert_eq!(view.set_layer(Layer::Filter, "gamma").len(), 1);
        assert_eq!(view.spans(Layer::Search).len(), 2);

        view.replace("beta\nbeta\nbeta", &rules());
        assert_eq!(view.spans(Layer::Search).len(), 3);
        assert!(view.spans(Layer::Filter).is_empty());
        assert_eq!(view.term(Layer::Filter), "gamma");

        view.set_layer(Layer::Search, "");
        assert!(view.spans(Layer::Search).is_empty());
        assert_eq!(view.text(), "beta\nbeta\nbeta");
    }

    #[test]
    fn clear_then_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut view = SessionView::new(SourceKind::File, 100);
        view.replace("a\nb", &rules());
        let out = dir.path().join("saved.log");
        view.save(&out).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "a\nb\n");

        view.clear();
        assert!(view.lines().is_empty());
    }

    #[test]
    fn restyle_applies_new_rules() {
        let mut view = SessionView::new(SourceKind::File, 100);
        view.replace("ERROR here", &rules());
        let recolored = rules().with_style("error", Style::new("magenta"));
        view.restyle(&recolored);
        assert_eq!(view.lines()[0].style, Some(Style::new("magenta")));
    }
}
