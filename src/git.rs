//! Source acquisition and commit history.
//!
//! [`GitAcquirer`] produces a local working copy for a job:
//!
//! 1. `git` jobs are cloned into `<repositories_dir>/<org>/<repo>` (shallow,
//!    single branch when configured), or fetched and hard-reset when a clone
//!    already exists there.
//! 2. The branch is resolved from `HEAD` when the job carries none.
//! 3. `file` jobs are a pass-through: the address must be an existing
//!    directory holding the extracted archive.
//!
//! [`GitCommitHistory`] reads recent commits with `git log`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use repo_scribe_core::models::{CommitInfo, JobKind, RepositoryJob};

use crate::config::AcquisitionConfig;

/// A working copy ready for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredSource {
    pub local_path: PathBuf,
    pub branch: Option<String>,
    pub repo_name: String,
    pub org_name: String,
}

/// Obtains a local working copy for a job.
#[async_trait]
pub trait SourceAcquirer: Send + Sync {
    async fn acquire(&self, job: &RepositoryJob) -> Result<AcquiredSource>;
}

/// Lists recent commits of a working copy.
#[async_trait]
pub trait CommitHistory: Send + Sync {
    async fn list_recent_commits(&self, path: &Path, n: usize) -> Result<Vec<CommitInfo>>;
}

pub struct GitAcquirer {
    repositories_dir: PathBuf,
    shallow: bool,
    token: Option<String>,
}

impl GitAcquirer {
    pub fn new(config: &AcquisitionConfig) -> Self {
        let token = config
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());
        Self {
            repositories_dir: config.repositories_dir.clone(),
            shallow: config.shallow,
            token,
        }
    }

    async fn acquire_git(&self, job: &RepositoryJob) -> Result<AcquiredSource> {
        let (org_name, repo_name) = parse_repo_address(&job.address);
        let dest = self.repositories_dir.join(&org_name).join(&repo_name);
        let url = match &self.token {
            Some(token) => with_token(&job.address, token),
            None => job.address.clone(),
        };

        if dest.join(".git").exists() {
            let branch = match &job.branch {
                Some(b) => b.clone(),
                None => current_branch(&dest).await?,
            };
            self.git_refresh(&dest, &branch).await?;
        } else {
            self.git_clone(&url, job.branch.as_deref(), &dest).await?;
        }

        let branch = current_branch(&dest).await.ok().or_else(|| job.branch.clone());

        Ok(AcquiredSource {
            local_path: dest,
            branch,
            repo_name,
            org_name,
        })
    }

    async fn git_clone(&self, url: &str, branch: Option<&str>, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create repositories directory: {}", parent.display())
            })?;
        }

        let mut cmd = Command::new("git");
        cmd.arg("clone");
        if let Some(branch) = branch {
            cmd.args(["--branch", branch]);
        }
        cmd.arg("--single-branch");
        if self.shallow {
            cmd.args(["--depth", "1"]);
        }
        cmd.arg(url);
        cmd.arg(dest);

        let output = cmd
            .output()
            .await
            .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

        if !output.status.success() {
            let stderr = self.redact(&String::from_utf8_lossy(&output.stderr));
            bail!("git clone failed: {}", stderr.trim());
        }

        Ok(())
    }

    async fn git_refresh(&self, repo_dir: &Path, branch: &str) -> Result<()> {
        run_git(repo_dir, &["fetch", "origin", branch])
            .await
            .map_err(|e| anyhow::anyhow!(self.redact(&format!("{:#}", e))))?;

        let remote_ref = format!("origin/{}", branch);
        run_git(repo_dir, &["reset", "--hard", &remote_ref]).await?;
        Ok(())
    }

    fn redact(&self, text: &str) -> String {
        match &self.token {
            Some(token) => text.replace(token.as_str(), "***"),
            None => text.to_string(),
        }
    }
}

#[async_trait]
impl SourceAcquirer for GitAcquirer {
    async fn acquire(&self, job: &RepositoryJob) -> Result<AcquiredSource> {
        match job.kind {
            JobKind::Git => self.acquire_git(job).await,
            JobKind::File => acquire_local(job),
        }
    }
}

fn acquire_local(job: &RepositoryJob) -> Result<AcquiredSource> {
    let path = PathBuf::from(&job.address);
    if !path.is_dir() {
        bail!("Local source directory does not exist: {}", path.display());
    }
    let repo_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| short_hash(&job.address));

    Ok(AcquiredSource {
        local_path: path,
        branch: job.branch.clone(),
        repo_name,
        org_name: "local".to_string(),
    })
}

/// Run a git subcommand in `repo_dir` and return its stdout.
async fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .await
        .with_context(|| format!("Failed to execute 'git {}'", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args[0], stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

async fn current_branch(repo_dir: &Path) -> Result<String> {
    let branch = run_git(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    let branch = branch.trim();
    if branch.is_empty() || branch == "HEAD" {
        bail!("Could not resolve branch of {}", repo_dir.display());
    }
    Ok(branch.to_string())
}

/// Split a remote address into `(organization, repository)`.
///
/// Handles `https://host/org/repo(.git)` and `git@host:org/repo.git`.
/// Both parts become directory names under the repositories directory, so a
/// segment that is empty, `.`, `..` or carries a path separator is replaced:
/// the organization by a hash of the address, the repository by
/// `repository`.
pub fn parse_repo_address(address: &str) -> (String, String) {
    let trimmed = address.trim().trim_end_matches('/');
    let path = if let Some((_, rest)) = trimmed.split_once("://") {
        rest.split_once('/').map(|(_, p)| p).unwrap_or("")
    } else if let Some((_, rest)) = trimmed.split_once(':') {
        rest
    } else {
        trimmed
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let (org, repo) = match segments.as_slice() {
        [.., org, repo] => (
            safe_segment(org),
            safe_segment(repo.trim_end_matches(".git")),
        ),
        [repo] => (None, safe_segment(repo.trim_end_matches(".git"))),
        [] => (None, None),
    };
    (
        org.unwrap_or_else(|| short_hash(address)),
        repo.unwrap_or_else(|| "repository".to_string()),
    )
}

fn safe_segment(segment: &str) -> Option<String> {
    let segment = segment.trim();
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\'])
    {
        return None;
    }
    Some(segment.to_string())
}

/// Insert a credential into an https remote URL.
///
/// URLs that are not https or already carry user info are returned unchanged.
pub fn with_token(url: &str, token: &str) -> String {
    let Some(rest) = url.strip_prefix("https://") else {
        return url.to_string();
    };
    let host = rest.split('/').next().unwrap_or("");
    if host.contains('@') {
        return url.to_string();
    }
    format!("https://x-access-token:{}@{}", token, rest)
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

// ============ Commit history ============

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

pub struct GitCommitHistory;

#[async_trait]
impl CommitHistory for GitCommitHistory {
    async fn list_recent_commits(&self, path: &Path, n: usize) -> Result<Vec<CommitInfo>> {
        let count = n.to_string();
        let stdout = run_git(
            path,
            &["log", "-n", &count, "--format=%an%x1f%ct%x1f%s%x1e"],
        )
        .await?;
        parse_git_log(&stdout)
    }
}

/// Parse `git log` output written with unit/record separators.
pub fn parse_git_log(output: &str) -> Result<Vec<CommitInfo>> {
    output
        .split(RECORD_SEP)
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .map(|record| {
            let mut fields = record.splitn(3, FIELD_SEP);
            let author = fields.next().unwrap_or_default().to_string();
            let timestamp = fields
                .next()
                .unwrap_or_default()
                .trim()
                .parse::<i64>()
                .with_context(|| format!("Invalid commit timestamp in: {}", record))?;
            let message = fields.next().unwrap_or_default().to_string();
            Ok(CommitInfo {
                author,
                timestamp,
                message,
            })
        })
        .collect()
}
