//! Keyword classification of displayed lines.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::config::HighlightConfig;

/// Display style tag attached to a line (a color name such as `red` or
/// `light green`); the renderer decides how to paint it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Style(String);

impl Style {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightRule {
    keyword: String,
    folded: String,
    style: Style,
}

impl HighlightRule {
    #[must_use]
    pub fn new(keyword: &str, style: Style) -> Self {
        Self {
            keyword: keyword.to_string(),
            folded: keyword.to_uppercase(),
            style,
        }
    }

    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    #[must_use]
    pub const fn style(&self) -> &Style {
        &self.style
    }
}

/// Ordered rule set. Order is significant: the first matching rule wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightRules {
    rules: Vec<HighlightRule>,
}

impl HighlightRules {
    #[must_use]
    pub fn new(rules: Vec<HighlightRule>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn from_config(config: &HighlightConfig) -> Self {
        Self::new(
            config
                .rules
                .iter()
                .map(|r| HighlightRule::new(&r.keyword, Style::new(r.style.clone())))
                .collect(),
        )
    }

    #[must_use]
    pub fn rules(&self) -> &[HighlightRule] {
        &self.rules
    }

    /// Copy with `keyword`'s style replaced in place, or the rule appended
    /// when the keyword is new.
    #[must_use]
    pub fn with_style(&self, keyword: &str, style: Style) -> Self {
        let folded = keyword.to_uppercase();
        let mut rules = self.rules.clone();
        match rules.iter_mut().find(|r| r.folded == folded) {
            Some(rule) => rule.style = style,
            None => rules.push(HighlightRule::new(keyword, style)),
        }
        Self { rules }
    }
}

/// Style of the first rule whose keyword is a case-insensitive substring of
/// `line`, if any.
#[must_use]
pub fn classify(line: &str, rules: &HighlightRules) -> Option<Style> {
    if rules.rules.is_empty() {
        return None;
    }
    let folded = line.to_uppercase();
    rules
        .rules
        .iter()
        .find(|r| !r.folded.is_empty() && folded.contains(&r.folded))
        .map(|r| r.style.clone())
}

/// Rule set shared by every session's render step.
///
/// Readers take an immutable snapshot; writers swap in a new `Arc`.
#[derive(Debug, Clone, Default)]
pub struct SharedRules {
    current: Arc<RwLock<Arc<HighlightRules>>>,
}

impl SharedRules {
    #[must_use]
    pub fn new(rules: HighlightRules) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(rules))),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<HighlightRules> {
        Arc::clone(&self.current.read())
    }

    pub fn set_style(&self, keyword: &str, style: Style) {
        let mut guard = self.current.write();
        let next = guard.with_style(keyword, style);
        *guard = Arc::new(next);
    }

    pub fn replace(&self, rules: HighlightRules) {
        *self.current.write() = Arc::new(rules);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> HighlightRules {
        HighlightRules::from_config(&HighlightConfig::default())
    }

    #[test]
    fn first_rule_wins_on_overlap() {
        let r = rules();
        assert_eq!(
            classify("WARNING: an ERROR occurred", &r),
            Some(Style::new("red"))
        );
        assert_eq!(classify("warning only", &r), Some(Style::new("yellow")));
        assert_eq!(
            classify("Download Successful", &r),
            Some(Style::new("light green"))
        );
        assert_eq!(classify("plain line", &r), None);
    }

    #[test]
    fn empty_rule_set_never_matches() {
        assert_eq!(classify("ERROR", &HighlightRules::default()), None);
    }

    #[test]
    fn set_style_keeps_order_and_appends_new() {
        let shared = SharedRules::new(rules());
        let before = shared.snapshot();

        shared.set_style("error", Style::new("magenta"));
        shared.set_style("Relay", Style::new("cyan"));

        let after = shared.snapshot();
        let keywords: Vec<&str> = after.rules().iter().map(HighlightRule::keyword).collect();
        assert_eq!(keywords, vec!["ERROR", "WARNING", "SUCCESSFUL", "Relay"]);
        assert_eq!(after.rules()[0].style(), &Style::new("magenta"));
        assert_eq!(classify("relay selected", &after), Some(Style::new("cyan")));

        // Earlier snapshots are unaffected.
        assert_eq!(before.rules()[0].style(), &Style::new("red"));
    }
}
