//! Dictionary substitution applied to message text before synthesis.
//!
//! Keys are regular expressions (regex crate syntax). A key that does not
//! compile is matched as a plain substring instead. Entries run in
//! dictionary order and each replaces every match before the next entry is
//! applied, so a later entry can rewrite text produced by an earlier one.
//! Replacement text is inserted verbatim; `$1`-style references are not
//! expanded.

use regex::{NoExpand, Regex};

enum Rule {
    Pattern(Regex, String),
    Literal(String, String),
}

/// A compiled snapshot of the dictionary.
pub struct TextPreparer {
    rules: Vec<Rule>,
}

impl TextPreparer {
    pub fn new(entries: &[(String, String)]) -> Self {
        let rules = entries
            .iter()
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, replacement)| match Regex::new(key) {
                Ok(re) => Rule::Pattern(re, replacement.clone()),
                Err(e) => {
                    tracing::debug!(key = %key, "dictionary key is not a valid pattern, matching literally: {}", e);
                    Rule::Literal(key.clone(), replacement.clone())
                }
            })
            .collect();
        Self { rules }
    }

    pub fn apply(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, rule| match rule {
                Rule::Pattern(re, replacement) => {
                    re.replace_all(&acc, NoExpand(replacement)).into_owned()
                }
                Rule::Literal(key, replacement) => acc.replace(key.as_str(), replacement),
            })
    }
}

/// Applies `entries` to `text`.
pub fn prepare(text: &str, entries: &[(String, String)]) -> String {
    TextPreparer::new(entries).apply(text)
}
