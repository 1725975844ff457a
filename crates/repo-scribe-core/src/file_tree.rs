//! Hierarchical file tree built from a flat path list.
//!
//! Repository listings are fed to the generation service many times per job,
//! so this module compresses a flat list of relative paths into a tree and
//! renders it in several compact forms:
//!
//! | Renderer | Output |
//! |----------|--------|
//! | [`to_indented_string`] | `  name/F` / `  name/D` lines, two spaces per depth |
//! | [`to_compact_json`] | nested objects, files as the literal `"F"` |
//! | [`to_unix_tree`] | `tree`-style box drawing |
//! | [`to_deduplicated_path_list`] | full paths with single-child directories elided |
//!
//! # Promotion
//!
//! A node first inferred as a file becomes a directory as soon as a later
//! path descends through it. Directories never demote to files.
//!
//! # Example
//!
//! ```rust
//! use repo_scribe_core::file_tree::{build, to_indented_string, NodeKind, PathEntry};
//!
//! let paths = vec![
//!     PathEntry::file("src/main.rs"),
//!     PathEntry::file("README.md"),
//! ];
//! let root = build(&paths, "");
//! assert_eq!(to_indented_string(&root), "src/D\n  main.rs/F\nREADME.md/F\n");
//! ```

use std::collections::BTreeMap;
use std::fmt::Write;

use serde_json::{Map, Value};

/// Whether a tree node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// One input path with its declared kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub path: String,
    pub kind: NodeKind,
}

impl PathEntry {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: NodeKind::Directory,
        }
    }
}

/// A node in the in-memory file tree. Children are keyed (and ordered) by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTreeNode {
    pub name: String,
    pub kind: NodeKind,
    pub children: BTreeMap<String, FileTreeNode>,
}

impl FileTreeNode {
    fn new(name: &str, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            children: BTreeMap::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Children with directories first, then alphabetical by name.
    pub fn sorted_children(&self) -> Vec<&FileTreeNode> {
        let mut children: Vec<&FileTreeNode> = self.children.values().collect();
        children.sort_by(|a, b| b.is_dir().cmp(&a.is_dir()).then_with(|| a.name.cmp(&b.name)));
        children
    }

    /// Number of file leaves under this node.
    pub fn file_count(&self) -> usize {
        match self.kind {
            NodeKind::File => 1,
            NodeKind::Directory => self.children.values().map(|c| c.file_count()).sum(),
        }
    }
}

/// Build a tree from `paths`, stripping `base_path` from each.
///
/// Backslashes are treated as separators. Paths whose first segment starts
/// with `.` (e.g. `.github/workflows/ci.yml`) are skipped entirely, as are
/// paths that are empty after stripping. The root is always a directory with
/// an empty name.
pub fn build(paths: &[PathEntry], base_path: &str) -> FileTreeNode {
    let mut root = FileTreeNode::new("", NodeKind::Directory);
    let base = normalize(base_path);

    for entry in paths {
        let normalized = normalize(&entry.path);
        let relative = strip_base(&normalized, &base);

        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        let Some(first) = segments.first() else {
            continue;
        };
        if first.starts_with('.') {
            continue;
        }

        let last = segments.len() - 1;
        let mut current = &mut root;
        for (i, segment) in segments.iter().enumerate() {
            let kind = if i == last {
                entry.kind
            } else {
                NodeKind::Directory
            };
            let child = current
                .children
                .entry(segment.to_string())
                .or_insert_with(|| FileTreeNode::new(segment, kind));
            if kind == NodeKind::Directory {
                child.kind = NodeKind::Directory;
            }
            current = child;
        }
    }

    root
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Strip `base` only on a segment boundary, so `/repo` does not eat `/repository`.
fn strip_base<'a>(path: &'a str, base: &str) -> &'a str {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return path.trim_start_matches('/');
    }
    match path.strip_prefix(base) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => path.trim_start_matches('/'),
    }
}

/// Depth-first listing, one `<indent><name>/<F|D>` line per node.
pub fn to_indented_string(root: &FileTreeNode) -> String {
    let mut out = String::new();
    for child in root.sorted_children() {
        write_indented(child, 0, &mut out);
    }
    out
}

fn write_indented(node: &FileTreeNode, depth: usize, out: &mut String) {
    let marker = if node.is_dir() { 'D' } else { 'F' };
    let _ = writeln!(out, "{}{}/{}", "  ".repeat(depth), node.name, marker);
    if node.is_dir() {
        for child in node.sorted_children() {
            write_indented(child, depth + 1, out);
        }
    }
}

/// Nested JSON object: directories map child names to subtrees, files are `"F"`.
pub fn to_compact_json(root: &FileTreeNode) -> String {
    compact_value(root).to_string()
}

fn compact_value(node: &FileTreeNode) -> Value {
    match node.kind {
        NodeKind::File => Value::String("F".to_string()),
        NodeKind::Directory => {
            let map: Map<String, Value> = node
                .children
                .iter()
                .map(|(name, child)| (name.clone(), compact_value(child)))
                .collect();
            Value::Object(map)
        }
    }
}

/// Box-drawing rendering in the style of the `tree` command.
pub fn to_unix_tree(root: &FileTreeNode) -> String {
    let mut out = String::from(".\n");
    write_unix(root, "", &mut out);
    out
}

fn write_unix(node: &FileTreeNode, prefix: &str, out: &mut String) {
    let children = node.sorted_children();
    let count = children.len();
    for (i, child) in children.into_iter().enumerate() {
        let is_last = i + 1 == count;
        let connector = if is_last { "└── " } else { "├── " };
        let _ = writeln!(out, "{}{}{}", prefix, connector, child.name);
        if child.is_dir() {
            let extension = if is_last { "    " } else { "│   " };
            write_unix(child, &format!("{}{}", prefix, extension), out);
        }
    }
}

/// Full paths, depth-first, with single-child directories elided.
///
/// A directory with several children (or none) is emitted as `path/` before
/// its contents; a directory with exactly one child is not emitted because
/// that child's full path already names it.
pub fn to_deduplicated_path_list(root: &FileTreeNode) -> Vec<String> {
    let mut out = Vec::new();
    for child in root.sorted_children() {
        collect_paths(child, "", &mut out);
    }
    out
}

fn collect_paths(node: &FileTreeNode, parent: &str, out: &mut Vec<String>) {
    let path = if parent.is_empty() {
        node.name.clone()
    } else {
        format!("{}/{}", parent, node.name)
    };

    match node.kind {
        NodeKind::File => out.push(path),
        NodeKind::Directory => {
            if node.children.len() != 1 {
                out.push(format!("{}/", path));
            }
            for child in node.sorted_children() {
                collect_paths(child, &path, out);
            }
        }
    }
}

/// Walk a [`to_compact_json`] value back into the full file paths it encodes.
pub fn paths_from_compact_json(json: &str) -> serde_json::Result<Vec<String>> {
    let value: Value = serde_json::from_str(json)?;
    let mut out = Vec::new();
    walk_compact(&value, "", &mut out);
    Ok(out)
}

fn walk_compact(value: &Value, prefix: &str, out: &mut Vec<String>) {
    if let Value::Object(map) = value {
        for (name, child) in map {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            match child {
                Value::Object(_) => walk_compact(child, &path, out),
                _ => out.push(path),
            }
        }
    }
}
