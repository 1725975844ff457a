//! Per-job processing pipeline.
//!
//! Every stage receives the job's [`PipelineContext`] explicitly; there is
//! no ambient per-job state. Stages run in order:
//!
//! | Stage | Fatal on error |
//! |-------|----------------|
//! | [`readme`] | yes |
//! | [`smart_filter`] | yes |
//! | [`classify`] | no |
//! | [`overview`] | yes |
//! | [`plan`] | yes |
//! | [`generate`] | per-node failures are isolated |
//! | [`outline`] | no |
//! | [`commit_log`] | no |

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::{info, warn};

use repo_scribe_core::extract::{extract_first, tagged_block, Strategy};
use repo_scribe_core::markdown::strip_reasoning;
use repo_scribe_core::models::{
    Classification, DocumentRecord, DocumentUpdate, JobKind, JobUpdate, RepositoryJob,
};
use repo_scribe_core::outline;
use repo_scribe_core::store::Store;

use crate::catalogue::{self, Catalogue};
use crate::config::Config;
use crate::generation::GenerationService;
use crate::generator::{ConcurrentDocumentGenerator, GenerationContext, GenerationReport};
use crate::git::{AcquiredSource, CommitHistory};
use crate::planner::{CataloguePlanner, PlanRequest, RetryPolicy};
use crate::prompts;

const FILTER_STRATEGIES: [Strategy; 3] = [
    Strategy::Tagged(prompts::RESPONSE_FILE_TAG),
    Strategy::AnyFence,
    Strategy::Raw,
];

const OVERVIEW_STRATEGIES: [Strategy; 2] = [Strategy::Tagged(prompts::BLOG_TAG), Strategy::Raw];

static CLASSIFY_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"classifyName:\s*(\w+)").ok());

/// Explicit per-job state handed to every stage.
pub struct PipelineContext {
    pub job: RepositoryJob,
    pub document: DocumentRecord,
    pub source: AcquiredSource,
    pub store: Arc<dyn Store>,
    pub service: Arc<dyn GenerationService>,
    pub commits: Arc<dyn CommitHistory>,
    pub config: Arc<Config>,
    /// README text, found or generated.
    pub readme: String,
    /// Catalogue text used in prompts (possibly simplified).
    pub catalogue: String,
    scanned: Option<Catalogue>,
}

impl PipelineContext {
    pub fn new(
        job: RepositoryJob,
        document: DocumentRecord,
        source: AcquiredSource,
        store: Arc<dyn Store>,
        service: Arc<dyn GenerationService>,
        commits: Arc<dyn CommitHistory>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            job,
            document,
            source,
            store,
            service,
            commits,
            config,
            readme: String::new(),
            catalogue: String::new(),
            scanned: None,
        }
    }

    pub fn working_path(&self) -> &PathBuf {
        &self.source.local_path
    }

    fn repo_name(&self) -> &str {
        &self.source.repo_name
    }

    /// Scan the working copy once per run.
    fn scanned(&mut self) -> Result<&Catalogue> {
        if self.scanned.is_none() {
            let scanned = catalogue::scan(
                &self.source.local_path,
                &self.config.catalogue.exclude_globs,
            )?;
            info!(job_id = %self.job.id, files = scanned.file_count, "Working copy scanned");
            self.scanned = Some(scanned);
        }
        match &self.scanned {
            Some(scanned) => Ok(scanned),
            None => bail!("working copy scan unavailable"),
        }
    }

    async fn update_document(&mut self, update: DocumentUpdate) -> Result<()> {
        self.store.update_document(&self.document.id, &update).await?;
        update.apply(&mut self.document, chrono::Utc::now().timestamp());
        Ok(())
    }

    async fn update_job(&mut self, update: JobUpdate) -> Result<()> {
        self.store.update_job(&self.job.id, &update).await?;
        update.apply(&mut self.job, chrono::Utc::now().timestamp());
        Ok(())
    }
}

/// Run every stage for one job.
pub async fn run(ctx: &mut PipelineContext) -> Result<GenerationReport> {
    readme(ctx).await.context("readme stage failed")?;
    smart_filter(ctx).await.context("catalogue stage failed")?;
    classify(ctx).await;
    overview(ctx).await.context("overview stage failed")?;
    plan(ctx).await.context("planning stage failed")?;
    let report = generate(ctx).await.context("generation stage failed")?;
    outline(ctx).await;
    commit_log(ctx).await;
    Ok(report)
}

/// Use the repository's README, or ask the service to write one.
pub async fn readme(ctx: &mut PipelineContext) -> Result<()> {
    let found = match catalogue::find_readme(ctx.working_path()) {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| warn!(path = %path.display(), error = %e, "Unreadable README"))
            .ok()
            .filter(|text| !text.trim().is_empty()),
        None => None,
    };

    let text = match found {
        Some(text) => text,
        None => {
            info!(job_id = %ctx.job.id, "No README found, generating one");
            let listing = ctx.scanned()?.listing();
            let prompt = prompts::readme_prompt(ctx.repo_name(), &listing);
            let generated = strip_reasoning(&ctx.service.complete(&prompt).await?);
            if generated.is_empty() {
                bail!("generated README is empty");
            }
            generated
        }
    };

    ctx.readme = text.clone();
    ctx.update_document(DocumentUpdate {
        readme: Some(text),
        ..DocumentUpdate::default()
    })
    .await
}

/// Build the catalogue text, simplifying it when the repository is large.
pub async fn smart_filter(ctx: &mut PipelineContext) -> Result<()> {
    if let Some(cached) = ctx
        .job
        .optimized_directory_structure
        .clone()
        .filter(|c| !c.trim().is_empty())
    {
        info!(job_id = %ctx.job.id, "Reusing cached catalogue");
        ctx.catalogue = cached;
        return Ok(());
    }

    let threshold = ctx.config.catalogue.smart_filter_threshold;
    let (listing, file_count) = {
        let scanned = ctx.scanned()?;
        (scanned.listing(), scanned.file_count)
    };
    if listing.trim().is_empty() {
        bail!("working copy contains no documentable files");
    }

    let text = if file_count > threshold {
        info!(job_id = %ctx.job.id, files = file_count, threshold, "Simplifying catalogue");
        let prompt = prompts::smart_filter_prompt(&listing);
        let prompt = prompt.as_str();
        let policy = RetryPolicy::from_config(&ctx.config.planner);
        let service = ctx.service.as_ref();
        policy
            .run("catalogue simplification", move |_| async move {
                let output = service.complete(prompt).await?;
                match extract_first(&strip_reasoning(&output), &FILTER_STRATEGIES) {
                    Some((_, payload)) => Ok(payload),
                    None => bail!("simplified catalogue is empty"),
                }
            })
            .await?
    } else {
        listing
    };

    ctx.catalogue = text.clone();
    ctx.update_job(JobUpdate {
        optimized_directory_structure: Some(text),
        ..JobUpdate::default()
    })
    .await
}

/// Assign a [`Classification`]. Never fails the job.
pub async fn classify(ctx: &mut PipelineContext) {
    if ctx.job.classification.is_some() {
        return;
    }

    let prompt = prompts::classify_prompt(&ctx.catalogue, &ctx.readme);
    let output = match ctx.service.complete(&prompt).await {
        Ok(output) => output,
        Err(e) => {
            warn!(job_id = %ctx.job.id, error = %format!("{:#}", e), "Classification failed");
            return;
        }
    };

    let Some(classification) = parse_classification(&output) else {
        warn!(job_id = %ctx.job.id, "Classification output not recognised");
        return;
    };

    let update = JobUpdate {
        classification: Some(classification),
        ..JobUpdate::default()
    };
    match ctx.update_job(update).await {
        Ok(()) => info!(job_id = %ctx.job.id, %classification, "Repository classified"),
        Err(e) => warn!(job_id = %ctx.job.id, error = %e, "Failed to store classification"),
    }
}

/// Find `classifyName:<Tag>` (inside `<classify>` when present).
pub fn parse_classification(output: &str) -> Option<Classification> {
    let scope = tagged_block(output, prompts::CLASSIFY_TAG).unwrap_or_else(|| output.to_string());
    let re = CLASSIFY_NAME.as_ref()?;
    let name = re.captures(&scope)?.get(1)?.as_str();
    name.parse().ok()
}

/// Write the overview article.
pub async fn overview(ctx: &mut PipelineContext) -> Result<()> {
    let prompt = prompts::overview_prompt(
        ctx.repo_name(),
        &ctx.catalogue,
        &ctx.readme,
        ctx.job.classification,
    );
    let output = strip_reasoning(&ctx.service.complete(&prompt).await?);
    let Some((_, article)) = extract_first(&output, &OVERVIEW_STRATEGIES) else {
        bail!("overview is empty");
    };

    ctx.update_document(DocumentUpdate {
        overview: Some(strip_reasoning(&article)),
        ..DocumentUpdate::default()
    })
    .await
}

/// Plan the catalogue and atomically replace the job's forest.
pub async fn plan(ctx: &mut PipelineContext) -> Result<()> {
    let request = PlanRequest {
        job_id: ctx.job.id.clone(),
        working_path: ctx.working_path().clone(),
        repository_url: ctx.job.address.clone(),
        catalogue: ctx.catalogue.clone(),
        readme: ctx.readme.clone(),
    };
    let policy = RetryPolicy::from_config(&ctx.config.planner);
    let tree = CataloguePlanner::new(ctx.service.as_ref(), policy)
        .plan(&request)
        .await?;

    let nodes = tree.flatten(&ctx.job.id);
    ctx.store.replace_catalogue(&ctx.job.id, &nodes).await?;
    info!(job_id = %ctx.job.id, nodes = nodes.len(), "Catalogue replaced");
    Ok(())
}

/// Generate every catalogue node.
pub async fn generate(ctx: &mut PipelineContext) -> Result<GenerationReport> {
    let nodes = ctx.store.list_catalogue(&ctx.job.id).await?;
    let gen_ctx = GenerationContext {
        job_id: ctx.job.id.clone(),
        working_path: ctx.working_path().clone(),
        repository_url: ctx.job.address.clone(),
        catalogue: ctx.catalogue.clone(),
        max_file_chars: ctx.config.generator.max_file_chars,
    };

    let generator =
        ConcurrentDocumentGenerator::new(Arc::clone(&ctx.service), Arc::clone(&ctx.store));
    let report = generator
        .generate_all(nodes, ctx.config.generator.max_concurrency, &gen_ctx)
        .await;

    for failure in &report.failures {
        warn!(job_id = %ctx.job.id, node = %failure.title, error = %failure.error, "Node skipped");
    }
    Ok(report)
}

/// Build the repository mind map. Never fails the job.
pub async fn outline(ctx: &mut PipelineContext) {
    if let Err(e) = try_outline(ctx).await {
        warn!(job_id = %ctx.job.id, error = %format!("{:#}", e), "Outline generation failed");
    }
}

async fn try_outline(ctx: &mut PipelineContext) -> Result<()> {
    let prompt = prompts::outline_prompt(&ctx.job.address, &ctx.catalogue, &ctx.readme);
    let output = strip_reasoning(&ctx.service.complete(&prompt).await?);
    let tree = outline::parse_text(&output);
    if tree.title.is_empty() && tree.children.is_empty() {
        bail!("outline contains no headings");
    }

    ctx.update_document(DocumentUpdate {
        outline_json: Some(serde_json::to_string(&tree)?),
        ..DocumentUpdate::default()
    })
    .await
}

/// Summarise recent commits for git jobs. Never fails the job.
pub async fn commit_log(ctx: &mut PipelineContext) {
    if ctx.job.kind != JobKind::Git || !ctx.config.commits.enabled {
        return;
    }
    if let Err(e) = try_commit_log(ctx).await {
        warn!(job_id = %ctx.job.id, error = %format!("{:#}", e), "Changelog generation failed");
    }
}

async fn try_commit_log(ctx: &mut PipelineContext) -> Result<()> {
    let commits = ctx
        .commits
        .list_recent_commits(ctx.working_path(), ctx.config.commits.max_commits)
        .await?;
    if commits.is_empty() {
        info!(job_id = %ctx.job.id, "No commits to summarise");
        return Ok(());
    }

    let prompt = prompts::changelog_prompt(ctx.repo_name(), &commits);
    let changelog = strip_reasoning(&ctx.service.complete(&prompt).await?);
    ctx.update_document(DocumentUpdate {
        changelog: Some(changelog),
        ..DocumentUpdate::default()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_from_tagged_output() {
        let out = "Thinking...\n<classify>\nclassifyName:Libraries\n</classify>";
        assert_eq!(parse_classification(out), Some(Classification::Libraries));
    }

    #[test]
    fn classification_without_tag() {
        assert_eq!(
            parse_classification("classifyName: CLITools"),
            Some(Classification::CliTools)
        );
        assert_eq!(
            parse_classification("classifyName:DevOpsConfiguration and some prose"),
            Some(Classification::DevOpsConfiguration)
        );
    }

    #[test]
    fn classification_unrecognised() {
        assert_eq!(parse_classification("It's a game engine."), None);
        assert_eq!(parse_classification("classifyName:Games"), None);
    }
}
