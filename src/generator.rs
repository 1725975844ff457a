//! Bounded-concurrency document generation.
//!
//! [`ConcurrentDocumentGenerator::generate_all`] fans a flat list of
//! catalogue nodes out over a pull queue:
//!
//! ```text
//!   queue ──▶ [ in-flight ≤ max_concurrency ] ──▶ join_next_with_id ──▶ persist / record failure
//!     ▲                                              │
//!     └──────────── refill as soon as a slot frees ──┘
//! ```
//!
//! Each node is generated independently. A failing node (generation error,
//! empty result, panic, persistence error) is logged and recorded in the
//! [`GenerationReport`]; it never cancels siblings or aborts the batch.

use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info};
use uuid::Uuid;

use repo_scribe_core::markdown::{repair_mermaid, strip_reasoning};
use repo_scribe_core::models::{CatalogueNode, GeneratedDocument};
use repo_scribe_core::store::Store;

use crate::generation::GenerationService;
use crate::prompts;

/// Shared, read-only inputs for every node of one job.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub job_id: String,
    pub working_path: PathBuf,
    pub repository_url: String,
    pub catalogue: String,
    /// Per-file character cap for dependent files embedded in a prompt.
    pub max_file_chars: usize,
}

/// A node that could not be generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub node_id: String,
    pub title: String,
    pub error: String,
}

/// Outcome of a batch.
#[derive(Debug, Default)]
pub struct GenerationReport {
    pub documents: Vec<GeneratedDocument>,
    pub failures: Vec<NodeFailure>,
}

struct NodeOutput {
    content: String,
    source_files: Vec<String>,
}

pub struct ConcurrentDocumentGenerator {
    service: Arc<dyn GenerationService>,
    store: Arc<dyn Store>,
}

impl ConcurrentDocumentGenerator {
    pub fn new(service: Arc<dyn GenerationService>, store: Arc<dyn Store>) -> Self {
        Self { service, store }
    }

    /// Generate and persist a document for every node, at most
    /// `max_concurrency` at a time.
    pub async fn generate_all(
        &self,
        nodes: Vec<CatalogueNode>,
        max_concurrency: usize,
        ctx: &GenerationContext,
    ) -> GenerationReport {
        let limit = max_concurrency.max(1);
        let ctx = Arc::new(ctx.clone());
        let mut queue: VecDeque<CatalogueNode> = nodes.into();
        let mut in_flight: JoinSet<Result<NodeOutput>> = JoinSet::new();
        let mut spawned: HashMap<Id, CatalogueNode> = HashMap::new();
        let mut report = GenerationReport::default();

        info!(job_id = %ctx.job_id, nodes = queue.len(), max_concurrency = limit, "Generating documents");

        while !queue.is_empty() || !in_flight.is_empty() {
            while in_flight.len() < limit {
                let Some(node) = queue.pop_front() else {
                    break;
                };
                let service = Arc::clone(&self.service);
                let ctx = Arc::clone(&ctx);
                let task_node = node.clone();
                let handle = in_flight.spawn(async move {
                    generate_node(service.as_ref(), &ctx, &task_node).await
                });
                spawned.insert(handle.id(), node);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                continue;
            };

            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) if e.is_panic() => (e.id(), Err(anyhow::anyhow!("generation task panicked"))),
                Err(e) => (e.id(), Err(anyhow::anyhow!("generation task aborted: {}", e))),
            };
            let Some(node) = spawned.remove(&id) else {
                error!(job_id = %ctx.job_id, task = %id, "Joined a generation task with no node");
                continue;
            };

            match result {
                Ok(output) => match self.persist(&ctx, &node, output).await {
                    Ok(doc) => {
                        info!(job_id = %ctx.job_id, node = %node.title, "Document generated");
                        report.documents.push(doc);
                    }
                    Err(e) => record_failure(&mut report, &ctx, &node, e),
                },
                Err(e) => record_failure(&mut report, &ctx, &node, e),
            }
        }

        info!(
            job_id = %ctx.job_id,
            generated = report.documents.len(),
            failed = report.failures.len(),
            "Document generation finished"
        );
        report
    }

    async fn persist(
        &self,
        ctx: &GenerationContext,
        node: &CatalogueNode,
        output: NodeOutput,
    ) -> Result<GeneratedDocument> {
        let doc = GeneratedDocument {
            id: Uuid::new_v4().to_string(),
            node_id: node.id.clone(),
            job_id: ctx.job_id.clone(),
            title: node.title.clone(),
            content: output.content,
            source_files: output.source_files,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.store.save_generated(&doc).await?;
        Ok(doc)
    }
}

fn record_failure(
    report: &mut GenerationReport,
    ctx: &GenerationContext,
    node: &CatalogueNode,
    err: anyhow::Error,
) {
    let error = format!("{:#}", err);
    error!(job_id = %ctx.job_id, node = %node.title, %error, "Document generation failed");
    report.failures.push(NodeFailure {
        node_id: node.id.clone(),
        title: node.title.clone(),
        error,
    });
}

async fn generate_node(
    service: &dyn GenerationService,
    ctx: &GenerationContext,
    node: &CatalogueNode,
) -> Result<NodeOutput> {
    let mut files = Vec::new();
    for rel in &node.dependent_files {
        match read_dependent_file(&ctx.working_path, rel, ctx.max_file_chars).await {
            Some(content) => files.push((rel.clone(), content)),
            None => debug!(node = %node.title, path = %rel, "Skipping unreadable dependent file"),
        }
    }

    let prompt = prompts::node_prompt(&ctx.repository_url, node, &ctx.catalogue, &files);
    let raw = service.complete(&prompt).await?;
    let content = repair_mermaid(&strip_reasoning(&raw));
    if content.trim().is_empty() {
        bail!("empty generation result for '{}'", node.title);
    }

    Ok(NodeOutput {
        content,
        source_files: files.into_iter().map(|(path, _)| path).collect(),
    })
}

/// Read a repository-relative file, truncated to `max_chars` characters.
///
/// Absolute paths and paths that climb out of the working copy are refused.
async fn read_dependent_file(root: &Path, rel: &str, max_chars: usize) -> Option<String> {
    let rel_path = Path::new(rel.trim_start_matches("./"));
    if rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }

    let content = tokio::fs::read_to_string(root.join(rel_path)).await.ok()?;
    Some(truncate_chars(content, max_chars))
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
    text
}
