//! Storage abstraction for repo-scribe.
//!
//! The [`Store`] trait defines every persistence operation the orchestration
//! engine depends on, enabling pluggable backends (SQLite in the
//! application crate, in-memory for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    CatalogueNode, DocumentRecord, DocumentUpdate, GeneratedDocument, JobUpdate, RepositoryJob,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_job`](Store::insert_job) | Persist a newly submitted job |
/// | [`next_runnable_job`](Store::next_runnable_job) | Pick the next job for the scheduler |
/// | [`update_job`](Store::update_job) | Partial update by id |
/// | [`delete_job`](Store::delete_job) | Hard reset: job and all dependent rows |
/// | [`find_document`](Store::find_document) | The job's document record, if any |
/// | [`delete_documents_for_job`](Store::delete_documents_for_job) | Failure cleanup |
/// | [`replace_catalogue`](Store::replace_catalogue) | Atomically swap a job's catalogue forest |
/// | [`save_generated`](Store::save_generated) | Persist one node's document and mark it complete |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_job(&self, job: &RepositoryJob) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<RepositoryJob>>;

    /// All jobs in creation order.
    async fn list_jobs(&self) -> Result<Vec<RepositoryJob>>;

    /// The next job to process: `Processing` jobs before `Pending` ones,
    /// then oldest first.
    async fn next_runnable_job(&self) -> Result<Option<RepositoryJob>>;

    /// Write only the fields set in `update`. Errors if the job does not exist.
    async fn update_job(&self, id: &str, update: &JobUpdate) -> Result<()>;

    /// Delete a job together with its documents, catalogue, and generated content.
    async fn delete_job(&self, id: &str) -> Result<()>;

    async fn find_document(&self, job_id: &str) -> Result<Option<DocumentRecord>>;

    async fn insert_document(&self, doc: &DocumentRecord) -> Result<()>;

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<()>;

    /// Delete every document record of a job. Returns the number removed.
    async fn delete_documents_for_job(&self, job_id: &str) -> Result<u64>;

    /// Replace the job's whole catalogue forest (and any generated content
    /// hanging off the old nodes) in one atomic step.
    async fn replace_catalogue(&self, job_id: &str, nodes: &[CatalogueNode]) -> Result<()>;

    /// Catalogue nodes of a job, parents before children, siblings in order.
    async fn list_catalogue(&self, job_id: &str) -> Result<Vec<CatalogueNode>>;

    /// Insert a generated document with its file references and mark its
    /// node complete, atomically.
    async fn save_generated(&self, doc: &GeneratedDocument) -> Result<()>;

    async fn get_generated(&self, node_id: &str) -> Result<Option<GeneratedDocument>>;
}
