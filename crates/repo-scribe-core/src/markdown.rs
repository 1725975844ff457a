//! Post-processing of generated markdown before it is persisted.

use std::sync::LazyLock;

use regex::Regex;

static THINK_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").ok());

/// Remove `<think>…</think>` reasoning blocks some models emit inline.
pub fn strip_reasoning(text: &str) -> String {
    match THINK_BLOCK.as_ref() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Repair common syntax slips inside ```` ```mermaid ```` blocks.
///
/// Inside a mermaid block: typographic quotes become ASCII quotes, `<br>`
/// becomes `<br/>`, and trailing `;` are dropped. A mermaid block left open
/// at the end of the text is closed. Text outside mermaid blocks is untouched.
pub fn repair_mermaid(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_mermaid = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if !in_mermaid && trimmed.starts_with("```") && trimmed[3..].trim() == "mermaid" {
            in_mermaid = true;
            out.push_str(line);
        } else if in_mermaid && trimmed.starts_with("```") {
            in_mermaid = false;
            out.push_str(line);
        } else if in_mermaid {
            out.push_str(&repair_mermaid_line(line));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if in_mermaid {
        out.push_str("```\n");
    }
    if !text.ends_with('\n') && out.ends_with('\n') && !in_mermaid {
        out.pop();
    }
    out
}

fn repair_mermaid_line(line: &str) -> String {
    let fixed = line
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace("<br>", "<br/>");
    fixed.trim_end().trim_end_matches(';').to_string()
}
