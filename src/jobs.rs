//! Job management commands behind the `scribe` CLI.
//!
//! Each command opens the configured SQLite database, wraps it in a
//! [`SqliteStore`], and prints plain text to stdout.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use repo_scribe_core::models::{CatalogueNode, JobKind, JobStatus, JobUpdate, RepositoryJob};
use repo_scribe_core::store::Store;

use crate::catalogue::{self, TreeFormat};
use crate::config::Config;
use crate::db;
use crate::generation::create_service;
use crate::git::{GitAcquirer, GitCommitHistory};
use crate::migrate;
use crate::scheduler::{PollOutcome, WarehouseScheduler};
use crate::sqlite_store::SqliteStore;

async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    Ok(SqliteStore::new(pool))
}

async fn require_job(store: &dyn Store, id: &str) -> Result<RepositoryJob> {
    match store.get_job(id).await? {
        Some(job) => Ok(job),
        None => bail!("job not found: {}", id),
    }
}

/// Create a `Pending` job and print its id.
pub async fn submit_job(
    config: &Config,
    address: &str,
    branch: Option<String>,
    kind: JobKind,
) -> Result<String> {
    let address = match kind {
        JobKind::File => std::path::absolute(address)?.to_string_lossy().to_string(),
        JobKind::Git => address.trim().to_string(),
    };
    if address.is_empty() {
        bail!("repository address must not be empty");
    }

    let store = open_store(config).await?;
    let job = RepositoryJob::new(&address, branch, kind, chrono::Utc::now().timestamp());
    store.insert_job(&job).await?;
    store.pool().close().await;

    println!("{}", job.id);
    Ok(job.id)
}

pub async fn list_jobs(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let jobs = store.list_jobs().await?;
    store.pool().close().await;

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<4}  {:<20}  ADDRESS",
        "ID", "STATUS", "KIND", "CLASSIFICATION"
    );
    for job in &jobs {
        let classification = job
            .classification
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<36}  {:<10}  {:<4}  {:<20}  {}",
            job.id,
            job.status.as_str(),
            job.kind.as_str(),
            classification,
            job.address
        );
        if let Some(ref error) = job.error {
            println!("    error: {}", error);
        }
    }
    Ok(())
}

/// Print a job, its document record and its catalogue with completion flags.
pub async fn show_status(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let job = require_job(&store, id).await?;
    let document = store.find_document(id).await?;
    let nodes = store.list_catalogue(id).await?;
    store.pool().close().await;

    println!("Job:            {}", job.id);
    println!("Address:        {}", job.address);
    println!("Kind:           {}", job.kind);
    println!("Status:         {}", job.status);
    println!("Branch:         {}", job.branch.as_deref().unwrap_or("-"));
    if let (Some(org), Some(name)) = (&job.organization, &job.name) {
        println!("Repository:     {}/{}", org, name);
    }
    if let Some(c) = job.classification {
        println!("Classification: {}", c);
    }
    println!("Created:        {}", format_ts(job.created_at));
    println!("Updated:        {}", format_ts(job.updated_at));
    if let Some(ref error) = job.error {
        println!("Error:          {}", error);
    }

    if let Some(doc) = document {
        println!();
        println!("Document:       {} ({})", doc.id, doc.status);
        println!("Working copy:   {}", doc.working_path);
        println!("Readme:         {}", presence(&doc.readme));
        println!("Overview:       {}", presence(&doc.overview));
        println!("Outline:        {}", presence(&doc.outline_json));
        println!("Changelog:      {}", presence(&doc.changelog));
    }

    if !nodes.is_empty() {
        let done = nodes.iter().filter(|n| n.is_completed).count();
        println!();
        println!("Catalogue ({}/{} generated):", done, nodes.len());
        print!("{}", render_catalogue(&nodes));
    }
    Ok(())
}

fn presence(field: &Option<String>) -> String {
    match field {
        Some(text) => format!("{} chars", text.chars().count()),
        None => "-".to_string(),
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Indented catalogue forest, `[x]` marking nodes with a generated document.
pub fn render_catalogue(nodes: &[CatalogueNode]) -> String {
    let mut children: HashMap<Option<&str>, Vec<&CatalogueNode>> = HashMap::new();
    for node in nodes {
        children
            .entry(node.parent_id.as_deref())
            .or_default()
            .push(node);
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|n| n.order);
    }

    let mut out = String::new();
    let mut stack: Vec<(&CatalogueNode, usize)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|n| (*n, 0)).collect())
        .unwrap_or_default();
    while let Some((node, depth)) = stack.pop() {
        let mark = if node.is_completed { "x" } else { " " };
        out.push_str(&format!(
            "{}[{}] {} ({})\n",
            "  ".repeat(depth),
            mark,
            node.name,
            node.title
        ));
        if let Some(kids) = children.get(&Some(node.id.as_str())) {
            stack.extend(kids.iter().rev().map(|n| (*n, depth + 1)));
        }
    }
    out
}

/// Move a job back to `Pending` with its error cleared.
pub async fn retry_job(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let job = require_job(&store, id).await?;
    if job.status == JobStatus::Processing {
        bail!("job {} is currently processing", id);
    }
    store
        .update_job(id, &JobUpdate::status(JobStatus::Pending).clear_error())
        .await?;
    store.pool().close().await;

    println!("Job {} queued ({} -> Pending).", id, job.status);
    Ok(())
}

/// Delete a job and everything derived from it.
pub async fn reset_job(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    require_job(&store, id).await?;
    store.delete_job(id).await?;
    store.pool().close().await;

    println!("Job {} deleted.", id);
    Ok(())
}

/// Start the scheduler. With `once`, process at most one job and return.
pub async fn run_scheduler(config: &Config, once: bool) -> Result<()> {
    let store = open_store(config).await?;
    let pool = store.pool().clone();
    if !config.generation.is_enabled() {
        tracing::warn!(
            "Generation provider is disabled; jobs will fail at the first generation stage"
        );
    }
    let service = create_service(&config.generation)?;

    let scheduler = WarehouseScheduler::new(
        Arc::new(store),
        Arc::from(service),
        Arc::new(GitAcquirer::new(&config.acquisition)),
        Arc::new(GitCommitHistory),
        Arc::new(config.clone()),
    );

    if once {
        match scheduler.process_next().await? {
            PollOutcome::Idle => println!("No runnable job."),
            PollOutcome::Completed(id) => println!("Job {} completed.", id),
            PollOutcome::Failed(id) => println!("Job {} failed.", id),
        }
    } else {
        let token = scheduler.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested; finishing current job");
                token.cancel();
            }
        });
        scheduler.run().await;
    }

    pool.close().await;
    Ok(())
}

/// Render a directory the way the pipeline sees it.
pub fn print_tree(config: Option<&Config>, dir: &Path, format: TreeFormat) -> Result<()> {
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }
    let excludes = config
        .map(|c| c.catalogue.exclude_globs.clone())
        .unwrap_or_default();
    let scanned = catalogue::scan(dir, &excludes)?;
    print!("{}", catalogue::render(&scanned.root, format));
    eprintln!("{} files", scanned.file_count);
    Ok(())
}
