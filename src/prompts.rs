//! Prompt text for each pipeline stage.
//!
//! Each builder asks for its answer inside a dedicated tag so the stage can
//! recover it with the extraction chain in [`repo_scribe_core::extract`].

use std::fmt::Write;

use repo_scribe_core::models::{CatalogueNode, Classification, CommitInfo};
use repo_scribe_core::plan::PLAN_TAG;

/// Tag wrapping the simplified catalogue.
pub const RESPONSE_FILE_TAG: &str = "response_file";
/// Tag wrapping the classification answer.
pub const CLASSIFY_TAG: &str = "classify";
/// Tag wrapping the overview article.
pub const BLOG_TAG: &str = "blog";

pub fn readme_prompt(repo_name: &str, catalogue: &str) -> String {
    format!(
        "You are documenting the repository `{repo_name}`. It has no README.\n\
         Based on the file listing below, write a concise README in Markdown: \
         purpose, main components, and how to get started.\n\n\
         <catalogue>\n{catalogue}\n</catalogue>"
    )
}

pub fn smart_filter_prompt(catalogue: &str) -> String {
    format!(
        "The file listing below is too large to document in full. Remove files that \
         carry no documentation value (generated code, fixtures, assets, vendored \
         code) and keep every file that explains the project's structure or behavior. \
         Keep one path per line, unchanged.\n\
         Return the kept listing inside <{RESPONSE_FILE_TAG}></{RESPONSE_FILE_TAG}>.\n\n\
         <catalogue>\n{catalogue}\n</catalogue>"
    )
}

pub fn classify_prompt(catalogue: &str, readme: &str) -> String {
    let mut categories = String::new();
    for c in Classification::ALL {
        let _ = writeln!(categories, "- {}", c);
    }
    format!(
        "Classify this repository into exactly one category:\n{categories}\n\
         Answer with <{CLASSIFY_TAG}>classifyName:<Category></{CLASSIFY_TAG}>.\n\n\
         <readme>\n{readme}\n</readme>\n\n<catalogue>\n{catalogue}\n</catalogue>"
    )
}

pub fn overview_prompt(
    repo_name: &str,
    catalogue: &str,
    readme: &str,
    classification: Option<Classification>,
) -> String {
    let kind = classification
        .map(|c| format!(" It is classified as {}.", c))
        .unwrap_or_default();
    format!(
        "Write an overview article for the repository `{repo_name}`.{kind} Cover its \
         purpose, architecture, key modules and how they interact.\n\
         Return the article as Markdown inside <{BLOG_TAG}></{BLOG_TAG}>.\n\n\
         <readme>\n{readme}\n</readme>\n\n<catalogue>\n{catalogue}\n</catalogue>"
    )
}

/// First planning pass: free-form reasoning about how to document the repository.
pub fn think_prompt(repository_url: &str, catalogue: &str, readme: &str) -> String {
    format!(
        "You are planning documentation for {repository_url}. Study the README and file \
         listing, then reason step by step about the audiences, the main subsystems and \
         a sensible order of documentation sections. Do not produce the plan yet.\n\n\
         <readme>\n{readme}\n</readme>\n\n<catalogue>\n{catalogue}\n</catalogue>"
    )
}

/// Second planning pass: the structured plan.
pub fn plan_prompt(repository_url: &str, catalogue: &str, reasoning: &str) -> String {
    format!(
        "Using your analysis, produce the documentation plan for {repository_url} as JSON:\n\
         {{\"items\": [{{\"name\": \"Section name\", \"title\": \"section-slug\", \
         \"prompt\": \"what to write\", \"dependent_file\": [\"path\"], \
         \"children\": []}}]}}\n\
         Only reference paths from the listing. Wrap the JSON in \
         <{PLAN_TAG}></{PLAN_TAG}>.\n\n\
         <analysis>\n{reasoning}\n</analysis>\n\n<catalogue>\n{catalogue}\n</catalogue>"
    )
}

/// Prompt for a single catalogue node, embedding its dependent files.
pub fn node_prompt(
    repository_url: &str,
    node: &CatalogueNode,
    catalogue: &str,
    files: &[(String, String)],
) -> String {
    let mut sources = String::new();
    for (path, content) in files {
        let _ = write!(sources, "<file path=\"{path}\">\n{content}\n</file>\n");
    }
    format!(
        "Write the documentation page \"{name}\" for {repository_url}.\n\
         Instructions: {instructions}\n\
         Use Markdown. Diagrams must be ```mermaid blocks. Cite the files you rely on.\n\n\
         <catalogue>\n{catalogue}\n</catalogue>\n\n<sources>\n{sources}</sources>",
        name = node.name,
        instructions = node.prompt,
    )
}

pub fn outline_prompt(repository_url: &str, catalogue: &str, readme: &str) -> String {
    format!(
        "Produce a mind map of {repository_url} as a heading outline. One heading per \
         line, `#` for the repository itself, `##` for subsystems, `###` for their \
         parts. Write each heading as `Title:relative/path` when it maps to a file or \
         directory, otherwise just `Title`. Output the outline only.\n\n\
         <readme>\n{readme}\n</readme>\n\n<catalogue>\n{catalogue}\n</catalogue>"
    )
}

pub fn changelog_prompt(repo_name: &str, commits: &[CommitInfo]) -> String {
    let mut log = String::new();
    for commit in commits {
        let date = chrono::DateTime::from_timestamp(commit.timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| commit.timestamp.to_string());
        let _ = writeln!(log, "{} {}: {}", date, commit.author, commit.message);
    }
    format!(
        "Summarize the recent changes to `{repo_name}` as a Markdown changelog grouped \
         by theme (features, fixes, maintenance).\n\n<commits>\n{log}</commits>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prompt_lists_every_category() {
        let prompt = classify_prompt("src/main.rs", "# Tool");
        for c in Classification::ALL {
            assert!(prompt.contains(c.as_str()));
        }
        assert!(prompt.contains("<classify>"));
    }

    #[test]
    fn node_prompt_embeds_sources() {
        let node = CatalogueNode {
            id: "n".into(),
            job_id: "j".into(),
            parent_id: None,
            name: "Overview".into(),
            title: "overview".into(),
            prompt: "Explain the layout".into(),
            dependent_files: vec!["src/lib.rs".into()],
            order: 0,
            is_completed: false,
        };
        let prompt = node_prompt(
            "https://example.com/a/b",
            &node,
            "src/lib.rs",
            &[("src/lib.rs".into(), "pub fn x() {}".into())],
        );
        assert!(prompt.contains("Explain the layout"));
        assert!(prompt.contains("<file path=\"src/lib.rs\">\npub fn x() {}\n</file>"));
    }

    #[test]
    fn changelog_formats_dates() {
        let commits = vec![CommitInfo {
            author: "Ada".into(),
            timestamp: 0,
            message: "Initial commit".into(),
        }];
        let prompt = changelog_prompt("demo", &commits);
        assert!(prompt.contains("1970-01-01 Ada: Initial commit"));
    }
}
