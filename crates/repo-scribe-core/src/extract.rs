//! Recovery of structured payloads from free-form generation output.
//!
//! Generation services rarely return bare JSON. Each [`Strategy`] is a pure
//! `text → Option<text>` function; [`extract_first`] tries an ordered list
//! of them and returns the first match. The default plan chain is:
//!
//! 1. [`Strategy::Tagged`] — content between `<tag>` and `</tag>`
//! 2. [`Strategy::Fenced`] — content of a fenced code block with the given label
//! 3. [`Strategy::Raw`] — the trimmed output itself
//!
//! ```rust
//! use repo_scribe_core::extract::{extract_first, Strategy};
//!
//! let out = "Sure!\n```json\n{\"a\":1}\n```";
//! let chain = [Strategy::Tagged("plan"), Strategy::Fenced("json"), Strategy::Raw];
//! let (used, payload) = extract_first(out, &chain).unwrap();
//! assert_eq!(used, Strategy::Fenced("json"));
//! assert_eq!(payload, "{\"a\":1}");
//! ```

use regex::Regex;

/// A single extraction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Content between `<name>` and `</name>` (first occurrence, non-greedy).
    Tagged(&'static str),
    /// Content of the first fenced block labelled with this language.
    Fenced(&'static str),
    /// Content of the first fenced block regardless of label.
    AnyFence,
    /// The whole output, trimmed. Matches any non-empty text.
    Raw,
}

impl Strategy {
    /// Apply this strategy, returning the trimmed payload if it matches.
    pub fn apply(&self, text: &str) -> Option<String> {
        let found = match self {
            Strategy::Tagged(tag) => tagged_block(text, tag),
            Strategy::Fenced(label) => fenced_block(text, Some(label)),
            Strategy::AnyFence => fenced_block(text, None),
            Strategy::Raw => Some(text.trim().to_string()),
        };
        found.filter(|s| !s.is_empty())
    }
}

/// Try `chain` in order; return the first strategy that matched and its payload.
pub fn extract_first(text: &str, chain: &[Strategy]) -> Option<(Strategy, String)> {
    chain
        .iter()
        .find_map(|strategy| strategy.apply(text).map(|payload| (*strategy, payload)))
}

/// Content between `<tag>` and `</tag>`.
pub fn tagged_block(text: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?s)<{0}>(.*?)</{0}>", regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Content of a fenced code block, optionally requiring a language label.
pub fn fenced_block(text: &str, label: Option<&str>) -> Option<String> {
    let pattern = match label {
        Some(label) => format!(r"(?s)```[ \t]*{}[ \t]*\r?\n(.*?)```", regex::escape(label)),
        None => r"(?s)```[^\n]*\r?\n(.*?)```".to_string(),
    };
    let re = Regex::new(&pattern).ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}
