//! Core data models used throughout repo-scribe.
//!
//! These types represent the persisted entities the orchestration engine
//! reads and mutates: repository jobs, their document records, the
//! catalogue forest, and the documents generated for each catalogue node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a repository's working copy is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Cloned (or refreshed) from a git remote.
    Git,
    /// Pre-extracted archive already on local disk.
    File,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Git => "git",
            JobKind::File => "file",
        }
    }
}

impl FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "git" => Ok(JobKind::Git),
            "file" => Ok(JobKind::File),
            other => anyhow::bail!("unknown job kind: '{}'. Must be git or file.", other),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status shared by jobs and document records.
///
/// ```text
/// Pending → Processing → Completed
///                      ↘ Failed
/// ```
///
/// `Failed` stops automatic pickup; re-submission moves it back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Processing => "Processing",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }

    /// Whether the scheduler may pick a job in this status.
    pub fn is_runnable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Processing" => Ok(JobStatus::Processing),
            "Completed" => Ok(JobStatus::Completed),
            "Failed" => Ok(JobStatus::Failed),
            other => anyhow::bail!("unknown status: '{}'", other),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository category assigned by the classification stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Applications,
    Frameworks,
    Libraries,
    DevelopmentTools,
    CliTools,
    DevOpsConfiguration,
    Documentation,
}

impl Classification {
    pub const ALL: [Classification; 7] = [
        Classification::Applications,
        Classification::Frameworks,
        Classification::Libraries,
        Classification::DevelopmentTools,
        Classification::CliTools,
        Classification::DevOpsConfiguration,
        Classification::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Applications => "Applications",
            Classification::Frameworks => "Frameworks",
            Classification::Libraries => "Libraries",
            Classification::DevelopmentTools => "DevelopmentTools",
            Classification::CliTools => "CLITools",
            Classification::DevOpsConfiguration => "DevOpsConfiguration",
            Classification::Documentation => "Documentation",
        }
    }
}

impl FromStr for Classification {
    type Err = anyhow::Error;

    /// Case-insensitive; tolerates spaces, dashes and underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        Classification::ALL
            .into_iter()
            .find(|c| c.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| anyhow::anyhow!("unknown classification: '{}'", s))
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository submitted for documentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryJob {
    pub id: String,
    /// Git remote URL, or a local directory for `file` jobs.
    pub address: String,
    pub branch: Option<String>,
    pub kind: JobKind,
    pub status: JobStatus,
    pub error: Option<String>,
    /// Cached, token-efficient rendering of the repository's file list.
    pub optimized_directory_structure: Option<String>,
    pub classification: Option<Classification>,
    pub name: Option<String>,
    pub organization: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RepositoryJob {
    /// Create a fresh `Pending` job with a new UUID.
    pub fn new(address: &str, branch: Option<String>, kind: JobKind, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            address: address.to_string(),
            branch,
            kind,
            status: JobStatus::Pending,
            error: None,
            optimized_directory_structure: None,
            classification: None,
            name: None,
            organization: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial field set for [`Store::update_job`](crate::store::Store::update_job).
///
/// Only fields set to `Some` are written. `error` is doubly optional so it
/// can be explicitly cleared with `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub error: Option<Option<String>>,
    pub optimized_directory_structure: Option<String>,
    pub classification: Option<Classification>,
    pub branch: Option<String>,
    pub name: Option<String>,
    pub organization: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply this update to an in-memory job.
    pub fn apply(&self, job: &mut RepositoryJob, now: i64) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(ref error) = self.error {
            job.error = error.clone();
        }
        if let Some(ref s) = self.optimized_directory_structure {
            job.optimized_directory_structure = Some(s.clone());
        }
        if let Some(c) = self.classification {
            job.classification = Some(c);
        }
        if let Some(ref b) = self.branch {
            job.branch = Some(b.clone());
        }
        if let Some(ref n) = self.name {
            job.name = Some(n.clone());
        }
        if let Some(ref o) = self.organization {
            job.organization = Some(o.clone());
        }
        job.updated_at = now;
    }
}

/// Per-job record of the local working copy and its generated artefacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub job_id: String,
    pub working_path: String,
    pub status: JobStatus,
    pub readme: Option<String>,
    pub overview: Option<String>,
    /// JSON serialization of the repository outline tree.
    pub outline_json: Option<String>,
    pub changelog: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DocumentRecord {
    pub fn new(job_id: &str, working_path: &str, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            working_path: working_path.to_string(),
            status: JobStatus::Pending,
            readme: None,
            overview: None,
            outline_json: None,
            changelog: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial field set for [`Store::update_document`](crate::store::Store::update_document).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub working_path: Option<String>,
    pub status: Option<JobStatus>,
    pub readme: Option<String>,
    pub overview: Option<String>,
    pub outline_json: Option<String>,
    pub changelog: Option<String>,
}

impl DocumentUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, doc: &mut DocumentRecord, now: i64) {
        if let Some(ref p) = self.working_path {
            doc.working_path = p.clone();
        }
        if let Some(status) = self.status {
            doc.status = status;
        }
        if let Some(ref r) = self.readme {
            doc.readme = Some(r.clone());
        }
        if let Some(ref o) = self.overview {
            doc.overview = Some(o.clone());
        }
        if let Some(ref o) = self.outline_json {
            doc.outline_json = Some(o.clone());
        }
        if let Some(ref c) = self.changelog {
            doc.changelog = Some(c.clone());
        }
        doc.updated_at = now;
    }
}

/// One section of a job's documentation catalogue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogueNode {
    pub id: String,
    pub job_id: String,
    /// `None` for roots of the forest.
    pub parent_id: Option<String>,
    /// Display name.
    pub name: String,
    /// Whitespace-free slug used as an identifier downstream.
    pub title: String,
    /// Free-text generation instructions.
    pub prompt: String,
    pub dependent_files: Vec<String>,
    /// Position among siblings.
    pub order: i64,
    pub is_completed: bool,
}

/// Content generated for a single completed catalogue node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedDocument {
    pub id: String,
    pub node_id: String,
    pub job_id: String,
    pub title: String,
    pub content: String,
    /// Repository-relative paths consulted while generating `content`.
    pub source_files: Vec<String>,
    pub created_at: i64,
}

/// A commit as reported by the commit-history collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub author: String,
    pub timestamp: i64,
    pub message: String,
}
