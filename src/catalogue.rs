//! Working-copy scanning and catalogue rendering.
//!
//! Walks a working copy, drops build output, vendored dependencies and
//! binary assets, and renders what is left through the core file tree.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use repo_scribe_core::file_tree::{self, FileTreeNode, PathEntry};

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "bin", "obj", "dist"];

/// File patterns excluded from every catalogue.
const DEFAULT_EXCLUDES: &[&str] = &[
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
    "**/*.png",
    "**/*.jpg",
    "**/*.jpeg",
    "**/*.gif",
    "**/*.ico",
    "**/*.webp",
    "**/*.pdf",
    "**/*.zip",
    "**/*.tar",
    "**/*.gz",
    "**/*.exe",
    "**/*.dll",
    "**/*.so",
    "**/*.dylib",
    "**/*.class",
    "**/*.woff",
    "**/*.woff2",
    "**/*.ttf",
];

/// Output format for [`render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TreeFormat {
    Indented,
    Json,
    Unix,
    Paths,
}

/// A scanned working copy.
#[derive(Debug)]
pub struct Catalogue {
    pub root: FileTreeNode,
    pub file_count: usize,
}

impl Catalogue {
    /// The token-efficient listing sent to the generation service.
    pub fn listing(&self) -> String {
        file_tree::to_deduplicated_path_list(&self.root).join("\n")
    }
}

/// Scan `root` into a [`Catalogue`], applying default and extra excludes.
pub fn scan(root: &Path, extra_excludes: &[String]) -> Result<Catalogue> {
    let entries = scan_paths(root, extra_excludes)?;
    let tree = file_tree::build(&entries, "");
    Ok(Catalogue {
        file_count: tree.file_count(),
        root: tree,
    })
}

/// Relative (`/`-separated) paths of every kept file under `root`, sorted.
pub fn scan_paths(root: &Path, extra_excludes: &[String]) -> Result<Vec<PathEntry>> {
    let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
    patterns.extend(extra_excludes.iter().cloned());
    let exclude_set = build_globset(&patterns)?;

    let mut paths = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        paths.push(rel_str);
    }

    paths.sort();
    Ok(paths.into_iter().map(PathEntry::file).collect())
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// Render a tree in the requested format.
pub fn render(root: &FileTreeNode, format: TreeFormat) -> String {
    match format {
        TreeFormat::Indented => file_tree::to_indented_string(root),
        TreeFormat::Json => file_tree::to_compact_json(root),
        TreeFormat::Unix => file_tree::to_unix_tree(root),
        TreeFormat::Paths => {
            let mut out = file_tree::to_deduplicated_path_list(root).join("\n");
            out.push('\n');
            out
        }
    }
}

/// The first `README*` file at the top of `root`, preferring markdown.
pub fn find_readme(root: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .to_ascii_lowercase()
                .starts_with("readme")
        })
        .map(|e| e.path())
        .collect();

    candidates.sort_by_key(|p| {
        let is_markdown = p
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("md"))
            .unwrap_or(false);
        (!is_markdown, p.file_name().map(|n| n.to_os_string()))
    });
    candidates.into_iter().next()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
