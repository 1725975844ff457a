//! The warehouse scheduler: a single-worker polling loop over repository jobs.
//!
//! ```text
//! Pending ──▶ Processing ──▶ Completed
//!                 │
//!                 └────────▶ Failed   (error stored, document records deleted)
//! ```
//!
//! Each iteration picks one runnable job (interrupted `Processing` jobs
//! first, then the oldest `Pending`), acquires its working copy, ensures a
//! document record exists, and runs the [`pipeline`](crate::pipeline).
//! Errors never escape the loop: they are recorded on the job and the
//! scheduler backs off before polling again.
//!
//! Shutdown is cooperative. The [`CancellationToken`] is checked before
//! every poll and interrupts idle and backoff sleeps, but a job already in
//! the pipeline runs to completion or failure.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use repo_scribe_core::models::{DocumentRecord, DocumentUpdate, JobStatus, JobUpdate, RepositoryJob};
use repo_scribe_core::store::Store;

use crate::config::Config;
use crate::generation::GenerationService;
use crate::git::{CommitHistory, SourceAcquirer};
use crate::pipeline::{self, PipelineContext};

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No runnable job.
    Idle,
    Completed(String),
    Failed(String),
}

pub struct WarehouseScheduler {
    store: Arc<dyn Store>,
    service: Arc<dyn GenerationService>,
    acquirer: Arc<dyn SourceAcquirer>,
    commits: Arc<dyn CommitHistory>,
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl WarehouseScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        service: Arc<dyn GenerationService>,
        acquirer: Arc<dyn SourceAcquirer>,
        commits: Arc<dyn CommitHistory>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            service,
            acquirer,
            commits,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) before its next poll.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll until cancelled.
    pub async fn run(&self) {
        let poll_interval = Duration::from_secs(self.config.scheduler.poll_interval_secs);
        let backoff = Duration::from_secs(self.config.scheduler.failure_backoff_secs);
        info!(
            poll_interval_secs = poll_interval.as_secs(),
            "Warehouse scheduler started"
        );

        while !self.cancel.is_cancelled() {
            let pause = match self.process_next().await {
                Ok(PollOutcome::Idle) => poll_interval,
                Ok(PollOutcome::Completed(_)) => Duration::ZERO,
                Ok(PollOutcome::Failed(_)) => backoff,
                Err(e) => {
                    error!(error = %format!("{:#}", e), "Scheduler poll failed");
                    backoff
                }
            };

            if !pause.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!("Warehouse scheduler stopped");
    }

    /// Pick and process at most one job.
    ///
    /// Pipeline failures are recorded on the job and reported as
    /// [`PollOutcome::Failed`]; only storage errors while selecting or
    /// recording the outcome are returned as `Err`.
    pub async fn process_next(&self) -> Result<PollOutcome> {
        let Some(job) = self.store.next_runnable_job().await? else {
            return Ok(PollOutcome::Idle);
        };

        let span = info_span!("job", job_id = %job.id, address = %job.address);
        self.process_job(job).instrument(span).await
    }

    async fn process_job(&self, job: RepositoryJob) -> Result<PollOutcome> {
        info!(status = %job.status, "Processing job");
        let job_id = job.id.clone();

        match self.execute(job).await {
            Ok(()) => {
                self.store
                    .update_job(&job_id, &JobUpdate::status(JobStatus::Completed).clear_error())
                    .await?;
                info!("Job completed");
                Ok(PollOutcome::Completed(job_id))
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(error = %message, "Job failed");
                self.store
                    .update_job(&job_id, &JobUpdate::status(JobStatus::Failed).with_error(message))
                    .await?;
                let removed = self.store.delete_documents_for_job(&job_id).await?;
                info!(removed, "Document records cleared");
                Ok(PollOutcome::Failed(job_id))
            }
        }
    }

    async fn execute(&self, mut job: RepositoryJob) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let processing = JobUpdate::status(JobStatus::Processing);
        self.store.update_job(&job.id, &processing).await?;
        processing.apply(&mut job, now);

        let source = self
            .acquirer
            .acquire(&job)
            .await
            .context("source acquisition failed")?;
        info!(path = %source.local_path.display(), branch = ?source.branch, "Working copy ready");

        let identity = JobUpdate {
            branch: source.branch.clone(),
            name: Some(source.repo_name.clone()),
            organization: Some(source.org_name.clone()),
            ..JobUpdate::default()
        };
        self.store.update_job(&job.id, &identity).await?;
        identity.apply(&mut job, now);

        let working_path = source.local_path.to_string_lossy().to_string();
        let mut document = match self.store.find_document(&job.id).await? {
            Some(doc) => doc,
            None => {
                let doc = DocumentRecord::new(&job.id, &working_path, now);
                self.store.insert_document(&doc).await?;
                doc
            }
        };
        let started = DocumentUpdate {
            working_path: Some(working_path),
            ..DocumentUpdate::status(JobStatus::Processing)
        };
        self.store.update_document(&document.id, &started).await?;
        started.apply(&mut document, now);

        let document_id = document.id.clone();
        let mut ctx = PipelineContext::new(
            job,
            document,
            source,
            Arc::clone(&self.store),
            Arc::clone(&self.service),
            Arc::clone(&self.commits),
            Arc::clone(&self.config),
        );
        let report = pipeline::run(&mut ctx).await?;
        info!(
            generated = report.documents.len(),
            failed = report.failures.len(),
            "Pipeline finished"
        );

        self.store
            .update_document(&document_id, &DocumentUpdate::status(JobStatus::Completed))
            .await?;
        Ok(())
    }
}
