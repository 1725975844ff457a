//! Heading-outline parser.
//!
//! Turns a heading-delimited text block (levels marked by a run of `#`) into
//! a recursive title/reference tree. Each heading line has the form
//! `<#…#> Title[:Reference]`, split on the first colon.
//!
//! The outline's own top heading is written at the same level as its
//! children's siblings would be, so at the top scope the first heading
//! becomes the root node itself and every later top-level heading becomes a
//! child of it:
//!
//! ```rust
//! use repo_scribe_core::outline::parse;
//!
//! let root = parse(&["# A:urlA", "# B:urlB"]);
//! assert_eq!(root.title, "A");
//! assert_eq!(root.reference.as_deref(), Some("urlA"));
//! assert_eq!(root.children.len(), 1);
//! assert_eq!(root.children[0].title, "B");
//! ```

use serde::Serialize;

/// Marker character whose leading run sets a line's heading level.
pub const HEADING_MARKER: char = '#';

/// A node of a parsed outline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutlineNode {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub children: Vec<OutlineNode>,
}

/// Parse heading lines into an outline tree.
///
/// Lines that are not headings (level 0) are skipped, as are headings that
/// skip a level relative to their enclosing scope (e.g. `#` then `###`).
pub fn parse<S: AsRef<str>>(lines: &[S]) -> OutlineNode {
    let lines: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();
    parse_scope(&lines, 0, 0).0
}

/// Parse a free-text block, splitting it into lines first.
pub fn parse_text(text: &str) -> OutlineNode {
    let lines: Vec<&str> = text.lines().collect();
    parse(&lines)
}

/// Count of consecutive heading markers at the start of the (left-trimmed) line.
pub fn heading_level(line: &str) -> usize {
    line.trim_start()
        .chars()
        .take_while(|c| *c == HEADING_MARKER)
        .count()
}

fn parse_scope(lines: &[&str], start: usize, current_level: usize) -> (OutlineNode, usize) {
    let mut node = OutlineNode::default();
    let mut absorbed = false;
    let mut i = start;

    while i < lines.len() {
        let level = heading_level(lines[i]);
        if level == 0 {
            i += 1;
            continue;
        }
        // No exemption for the first line of a scope: a heading at or above
        // `current_level` always closes it, even when nothing was read yet.
        if level <= current_level {
            break;
        }
        if level == current_level + 1 {
            let (title, reference) = split_heading(lines[i], level);
            let (sub, next) = parse_scope(lines, i + 1, level);
            let child = OutlineNode {
                title,
                reference,
                children: sub.children,
            };

            if current_level == 0 && !absorbed {
                node = child;
                absorbed = true;
            } else {
                node.children.push(child);
            }
            i = next;
        } else {
            i += 1;
        }
    }

    (node, i)
}

fn split_heading(line: &str, level: usize) -> (String, Option<String>) {
    let text = line.trim_start();
    // Markers are ASCII, so byte offset == char count.
    let text = text[level..].trim();
    match text.split_once(':') {
        Some((title, reference)) => {
            let reference = reference.trim();
            (
                title.trim().to_string(),
                (!reference.is_empty()).then(|| reference.to_string()),
            )
        }
        None => (text.to_string(), None),
    }
}
