//! Library-level tests for the scheduler, pipeline and generator using
//! hand-written collaborators over both store implementations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tempfile::TempDir;

use repo_scribe::config::{parse_config, Config};
use repo_scribe::generation::{FragmentStream, GenerationService};
use repo_scribe::generator::{ConcurrentDocumentGenerator, GenerationContext};
use repo_scribe::git::{AcquiredSource, CommitHistory, GitAcquirer, SourceAcquirer};
use repo_scribe::scheduler::{PollOutcome, WarehouseScheduler};
use repo_scribe::sqlite_store::SqliteStore;
use repo_scribe::{db, migrate};
use repo_scribe_core::models::{
    CatalogueNode, Classification, CommitInfo, JobKind, JobStatus, RepositoryJob,
};
use repo_scribe_core::plan::PLAN_TAG;
use repo_scribe_core::store::memory::InMemoryStore;
use repo_scribe_core::store::Store;

// ============ Fakes ============

/// Answers each stage by recognising its prompt.
#[derive(Default)]
struct FakeService {
    fail_overview: bool,
    fail_node: Option<String>,
    panic_node: Option<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeService {
    fn prompts_containing(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

fn plan_payload() -> String {
    format!(
        "<{0}>\n{{\"items\":[\
         {{\"name\":\"Overview\",\"title\":\"overview\",\"prompt\":\"Describe the tool\",\
           \"dependent_file\":[\"src/main.rs\"],\
           \"children\":[{{\"name\":\"CLI\",\"title\":\"cli\",\"prompt\":\"Explain args\",\
             \"dependent_file\":[\"src/cli/args.rs\"]}}]}},\
         {{\"name\":\"Build\",\"title\":\"build\",\"prompt\":\"How to build\"}}\
         ]}}\n</{0}>",
        PLAN_TAG
    )
}

#[async_trait]
impl GenerationService for FakeService {
    fn name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.starts_with("Write the documentation page") {
            if let Some(ref bad) = self.panic_node {
                if prompt.contains(&format!("\"{}\"", bad)) {
                    panic!("page renderer crashed");
                }
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(ref bad) = self.fail_node {
                if prompt.contains(&format!("\"{}\"", bad)) {
                    bail!("upstream refused the request");
                }
            }
            return Ok(
                "<think>plan the page</think>\n# Page\n\n```mermaid\ngraph TD; A-->B;\n```\n"
                    .to_string(),
            );
        }
        if prompt.contains("<response_file>") {
            return Ok("<response_file>\nsrc/main.rs\n</response_file>".to_string());
        }
        if prompt.contains("<classify>") {
            return Ok("<classify>classifyName:Libraries</classify>".to_string());
        }
        if prompt.contains("<blog>") {
            if self.fail_overview {
                bail!("overview model unavailable");
            }
            return Ok("<blog>\n# Demo overview\n</blog>".to_string());
        }
        if prompt.contains("mind map") {
            return Ok("# demo\n## Entry:src/main.rs\n## CLI:src/cli".to_string());
        }
        if prompt.contains("<commits>") {
            return Ok("## Features\n- initial".to_string());
        }
        if prompt.contains("It has no README") {
            return Ok("# Generated readme".to_string());
        }
        bail!("unexpected prompt")
    }

    async fn complete_streaming(&self, prompt: &str) -> Result<FragmentStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let text = if prompt.contains("<analysis>") {
            plan_payload()
        } else {
            "Two audiences: users and contributors.".to_string()
        };
        let parts: Vec<Result<String>> = text
            .split_inclusive('\n')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(stream::iter(parts).boxed())
    }
}

/// Hands out a fixed directory as the working copy.
struct FixedAcquirer {
    path: PathBuf,
}

#[async_trait]
impl SourceAcquirer for FixedAcquirer {
    async fn acquire(&self, _job: &RepositoryJob) -> Result<AcquiredSource> {
        Ok(AcquiredSource {
            local_path: self.path.clone(),
            branch: Some("main".into()),
            repo_name: "demo".into(),
            org_name: "acme".into(),
        })
    }
}

struct BrokenAcquirer;

#[async_trait]
impl SourceAcquirer for BrokenAcquirer {
    async fn acquire(&self, _job: &RepositoryJob) -> Result<AcquiredSource> {
        bail!("remote hung up unexpectedly")
    }
}

struct FakeCommits;

#[async_trait]
impl CommitHistory for FakeCommits {
    async fn list_recent_commits(&self, _path: &Path, n: usize) -> Result<Vec<CommitInfo>> {
        assert_eq!(n, 20);
        Ok(vec![CommitInfo {
            author: "Ada".into(),
            timestamp: 1_700_000_000,
            message: "Add CLI".into(),
        }])
    }
}

// ============ Helpers ============

fn sample_repo(with_readme: bool) -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("src/cli")).unwrap();
    fs::create_dir_all(root.join("target/debug")).unwrap();
    if with_readme {
        fs::write(root.join("README.md"), "# Demo\n\nA tiny demo tool.").unwrap();
    }
    fs::write(root.join("src/main.rs"), "fn main() { cli::run(); }").unwrap();
    fs::write(root.join("src/cli/args.rs"), "pub struct Args;").unwrap();
    fs::write(root.join("target/debug/demo"), "binary").unwrap();
    tmp
}

fn config(extra: &str) -> Arc<Config> {
    let text = format!(
        "[db]\npath = \"unused.sqlite\"\n\n[planner]\nbackoff_base_ms = 1\n\n{}",
        extra
    );
    Arc::new(parse_config(&text).unwrap())
}

async fn submit(store: &dyn Store, address: &str, kind: JobKind) -> RepositoryJob {
    let job = RepositoryJob::new(address, None, kind, chrono::Utc::now().timestamp());
    store.insert_job(&job).await.unwrap();
    job
}

fn scheduler(
    store: Arc<dyn Store>,
    service: Arc<FakeService>,
    acquirer: Arc<dyn SourceAcquirer>,
    config: Arc<Config>,
) -> WarehouseScheduler {
    WarehouseScheduler::new(store, service, acquirer, Arc::new(FakeCommits), config)
}

async fn assert_fully_documented(store: &dyn Store, job_id: &str) {
    let job = store.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.error, None);
    assert_eq!(job.classification, Some(Classification::Libraries));
    assert!(job.optimized_directory_structure.is_some());

    let doc = store.find_document(job_id).await.unwrap().unwrap();
    assert_eq!(doc.status, JobStatus::Completed);
    assert!(doc.overview.as_deref().unwrap().contains("Demo overview"));
    assert!(doc.outline_json.as_deref().unwrap().contains("src/main.rs"));

    let nodes = store.list_catalogue(job_id).await.unwrap();
    assert_eq!(nodes.len(), 3);
    assert!(nodes.iter().all(|n| n.is_completed));
    let cli = nodes.iter().find(|n| n.name == "CLI").unwrap();
    let overview = nodes.iter().find(|n| n.name == "Overview").unwrap();
    assert_eq!(cli.parent_id.as_deref(), Some(overview.id.as_str()));

    let page = store.get_generated(&cli.id).await.unwrap().unwrap();
    assert!(!page.content.contains("<think>"));
    assert!(page.content.contains("graph TD"));
    assert_eq!(page.source_files, vec!["src/cli/args.rs".to_string()]);
}

// ============ Scheduler ============

#[tokio::test]
async fn test_git_job_end_to_end_in_memory() {
    let repo = sample_repo(true);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let service = Arc::new(FakeService::default());
    let job = submit(store.as_ref(), "https://example.com/acme/demo.git", JobKind::Git).await;

    let scheduler = scheduler(
        Arc::clone(&store),
        Arc::clone(&service),
        Arc::new(FixedAcquirer {
            path: repo.path().to_path_buf(),
        }),
        config(""),
    );

    assert_eq!(
        scheduler.process_next().await.unwrap(),
        PollOutcome::Completed(job.id.clone())
    );
    assert_fully_documented(store.as_ref(), &job.id).await;

    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.branch.as_deref(), Some("main"));
    assert_eq!(stored.organization.as_deref(), Some("acme"));

    let doc = store.find_document(&job.id).await.unwrap().unwrap();
    assert!(doc.readme.as_deref().unwrap().contains("A tiny demo tool"));
    assert!(doc.changelog.as_deref().unwrap().contains("Features"));

    // Small repository: no simplification pass, no README generation
    assert_eq!(service.prompts_containing("<response_file>"), 0);
    assert_eq!(service.prompts_containing("It has no README"), 0);
    assert!(!stored
        .optimized_directory_structure
        .unwrap()
        .contains("target/"));

    assert_eq!(scheduler.process_next().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn test_file_job_end_to_end_sqlite() {
    let repo = sample_repo(false);
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("scribe.sqlite")).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
    let service = Arc::new(FakeService::default());
    let config = config("");
    let address = repo.path().to_string_lossy().to_string();
    let job = submit(store.as_ref(), &address, JobKind::File).await;

    let scheduler = scheduler(
        Arc::clone(&store),
        Arc::clone(&service),
        Arc::new(GitAcquirer::new(&config.acquisition)),
        Arc::clone(&config),
    );

    assert_eq!(
        scheduler.process_next().await.unwrap(),
        PollOutcome::Completed(job.id.clone())
    );
    assert_fully_documented(store.as_ref(), &job.id).await;

    let doc = store.find_document(&job.id).await.unwrap().unwrap();
    assert_eq!(doc.readme.as_deref(), Some("# Generated readme"));
    assert_eq!(doc.working_path, address);
    // Commit summaries only apply to git jobs
    assert_eq!(doc.changelog, None);
    assert_eq!(service.prompts_containing("<commits>"), 0);
}

#[tokio::test]
async fn test_large_catalogue_is_simplified_and_cached() {
    let repo = sample_repo(true);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let service = Arc::new(FakeService::default());
    let job = submit(store.as_ref(), "https://example.com/acme/demo.git", JobKind::Git).await;

    let scheduler = scheduler(
        Arc::clone(&store),
        Arc::clone(&service),
        Arc::new(FixedAcquirer {
            path: repo.path().to_path_buf(),
        }),
        config("[catalogue]\nsmart_filter_threshold = 1\n"),
    );
    scheduler.process_next().await.unwrap();

    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(
        stored.optimized_directory_structure.as_deref(),
        Some("src/main.rs")
    );
    assert_eq!(service.prompts_containing("<response_file>"), 1);

    // Reprocessing reuses the cached catalogue
    let mut requeue = repo_scribe_core::models::JobUpdate::status(JobStatus::Pending);
    requeue.error = Some(None);
    store.update_job(&job.id, &requeue).await.unwrap();
    scheduler.process_next().await.unwrap();
    assert_eq!(service.prompts_containing("<response_file>"), 1);
}

#[tokio::test]
async fn test_failed_acquisition_marks_job_failed() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let service = Arc::new(FakeService::default());
    let job = submit(store.as_ref(), "https://example.com/acme/gone.git", JobKind::Git).await;

    let scheduler = scheduler(
        Arc::clone(&store),
        Arc::clone(&service),
        Arc::new(BrokenAcquirer),
        config(""),
    );

    assert_eq!(
        scheduler.process_next().await.unwrap(),
        PollOutcome::Failed(job.id.clone())
    );
    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    let error = stored.error.unwrap();
    assert!(error.contains("source acquisition failed"));
    assert!(error.contains("remote hung up"));

    // Failed jobs are not picked up again
    assert_eq!(scheduler.process_next().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn test_failed_pipeline_clears_document_records() {
    let repo = sample_repo(true);
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("scribe.sqlite")).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
    let service = Arc::new(FakeService {
        fail_overview: true,
        ..FakeService::default()
    });
    let job = submit(store.as_ref(), "https://example.com/acme/demo.git", JobKind::Git).await;

    let scheduler = scheduler(
        Arc::clone(&store),
        Arc::clone(&service),
        Arc::new(FixedAcquirer {
            path: repo.path().to_path_buf(),
        }),
        config(""),
    );

    assert_eq!(
        scheduler.process_next().await.unwrap(),
        PollOutcome::Failed(job.id.clone())
    );
    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.unwrap().contains("overview model unavailable"));
    assert!(store.find_document(&job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_interrupted_job_is_resumed_first() {
    let repo = sample_repo(true);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let service = Arc::new(FakeService::default());
    let _pending = submit(store.as_ref(), "https://example.com/acme/a.git", JobKind::Git).await;
    let interrupted = submit(store.as_ref(), "https://example.com/acme/b.git", JobKind::Git).await;
    store
        .update_job(
            &interrupted.id,
            &repo_scribe_core::models::JobUpdate::status(JobStatus::Processing),
        )
        .await
        .unwrap();

    let scheduler = scheduler(
        Arc::clone(&store),
        service,
        Arc::new(FixedAcquirer {
            path: repo.path().to_path_buf(),
        }),
        config(""),
    );
    assert_eq!(
        scheduler.process_next().await.unwrap(),
        PollOutcome::Completed(interrupted.id)
    );
}

#[tokio::test]
async fn test_run_stops_when_cancelled() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let scheduler = scheduler(
        store,
        Arc::new(FakeService::default()),
        Arc::new(BrokenAcquirer),
        config("[scheduler]\npoll_interval_secs = 3600\n"),
    );
    let token = scheduler.cancellation_token();

    let handle = tokio::spawn(async move { scheduler.run().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

// ============ Generator ============

fn flat_node(job_id: &str, i: usize) -> CatalogueNode {
    CatalogueNode {
        id: format!("node-{}", i),
        job_id: job_id.to_string(),
        parent_id: None,
        name: format!("Section {}", i),
        title: format!("section-{}", i),
        prompt: "Write it".into(),
        dependent_files: vec!["src/main.rs".into()],
        order: i as i64,
        is_completed: false,
    }
}

#[tokio::test]
async fn test_generator_bounds_concurrency_and_isolates_failures() {
    let repo = sample_repo(true);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let service = Arc::new(FakeService {
        fail_node: Some("Section 3".into()),
        ..FakeService::default()
    });

    let nodes: Vec<CatalogueNode> = (1..=5).map(|i| flat_node("job", i)).collect();
    store.replace_catalogue("job", &nodes).await.unwrap();

    let generator = ConcurrentDocumentGenerator::new(service.clone(), Arc::clone(&store));
    let ctx = GenerationContext {
        job_id: "job".into(),
        working_path: repo.path().to_path_buf(),
        repository_url: "https://example.com/acme/demo".into(),
        catalogue: "src/main.rs".into(),
        max_file_chars: 100,
    };
    let report = generator.generate_all(nodes, 2, &ctx).await;

    assert_eq!(report.documents.len(), 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].node_id, "node-3");
    assert!(report.failures[0].error.contains("upstream refused"));
    assert!(service.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(service.max_in_flight.load(Ordering::SeqCst), 2);

    let catalogue = store.list_catalogue("job").await.unwrap();
    for node in &catalogue {
        let generated = store.get_generated(&node.id).await.unwrap();
        if node.id == "node-3" {
            assert!(!node.is_completed);
            assert!(generated.is_none());
        } else {
            assert!(node.is_completed);
            assert!(generated.is_some());
        }
    }
}

#[tokio::test]
async fn test_generator_keeps_node_identity_when_a_task_panics() {
    let repo = sample_repo(true);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let service = Arc::new(FakeService {
        panic_node: Some("Section 2".into()),
        ..FakeService::default()
    });

    let nodes: Vec<CatalogueNode> = (1..=3).map(|i| flat_node("job", i)).collect();
    store.replace_catalogue("job", &nodes).await.unwrap();

    let generator = ConcurrentDocumentGenerator::new(service, Arc::clone(&store));
    let ctx = GenerationContext {
        job_id: "job".into(),
        working_path: repo.path().to_path_buf(),
        repository_url: "https://example.com/acme/demo".into(),
        catalogue: "src/main.rs".into(),
        max_file_chars: 100,
    };
    let report = generator.generate_all(nodes, 3, &ctx).await;

    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].node_id, "node-2");
    assert_eq!(report.failures[0].title, "section-2");
    assert!(report.failures[0].error.contains("panicked"));
}

#[tokio::test]
async fn test_generator_with_no_nodes() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let generator =
        ConcurrentDocumentGenerator::new(Arc::new(FakeService::default()), Arc::clone(&store));
    let ctx = GenerationContext {
        job_id: "job".into(),
        working_path: PathBuf::from("/nonexistent"),
        repository_url: String::new(),
        catalogue: String::new(),
        max_file_chars: 100,
    };
    let report = generator.generate_all(Vec::new(), 3, &ctx).await;
    assert!(report.documents.is_empty());
    assert!(report.failures.is_empty());
}
