//! In-memory [`Store`] implementation for tests.
//!
//! All tables live in one struct behind a single `std::sync::RwLock`, so
//! multi-table operations (catalogue replacement, saving generated content)
//! are atomic with respect to other callers.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{
    CatalogueNode, DocumentRecord, DocumentUpdate, GeneratedDocument, JobStatus, JobUpdate,
    RepositoryJob,
};

use super::Store;

#[derive(Default)]
struct Tables {
    jobs: Vec<RepositoryJob>,
    documents: Vec<DocumentRecord>,
    catalogue: Vec<CatalogueNode>,
    generated: HashMap<String, GeneratedDocument>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave the tables half-updated, so a
    // poisoned lock is still safe to read through.
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_job(&self, job: &RepositoryJob) -> Result<()> {
        let mut t = self.write();
        if t.jobs.iter().any(|j| j.id == job.id) {
            bail!("job already exists: {}", job.id);
        }
        t.jobs.push(job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<RepositoryJob>> {
        Ok(self.read().jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<RepositoryJob>> {
        let mut jobs = self.read().jobs.clone();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn next_runnable_job(&self) -> Result<Option<RepositoryJob>> {
        let t = self.read();
        let job = t
            .jobs
            .iter()
            .filter(|j| j.status.is_runnable())
            .min_by_key(|j| (j.status != JobStatus::Processing, j.created_at))
            .cloned();
        Ok(job)
    }

    async fn update_job(&self, id: &str, update: &JobUpdate) -> Result<()> {
        let mut t = self.write();
        match t.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                update.apply(job, now_ts());
                Ok(())
            }
            None => bail!("job not found: {}", id),
        }
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let mut t = self.write();
        t.jobs.retain(|j| j.id != id);
        t.documents.retain(|d| d.job_id != id);
        t.catalogue.retain(|n| n.job_id != id);
        t.generated.retain(|_, g| g.job_id != id);
        Ok(())
    }

    async fn find_document(&self, job_id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self
            .read()
            .documents
            .iter()
            .find(|d| d.job_id == job_id)
            .cloned())
    }

    async fn insert_document(&self, doc: &DocumentRecord) -> Result<()> {
        self.write().documents.push(doc.clone());
        Ok(())
    }

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<()> {
        let mut t = self.write();
        match t.documents.iter_mut().find(|d| d.id == id) {
            Some(doc) => {
                update.apply(doc, now_ts());
                Ok(())
            }
            None => bail!("document not found: {}", id),
        }
    }

    async fn delete_documents_for_job(&self, job_id: &str) -> Result<u64> {
        let mut t = self.write();
        let before = t.documents.len();
        t.documents.retain(|d| d.job_id != job_id);
        Ok((before - t.documents.len()) as u64)
    }

    async fn replace_catalogue(&self, job_id: &str, nodes: &[CatalogueNode]) -> Result<()> {
        let mut t = self.write();
        t.catalogue.retain(|n| n.job_id != job_id);
        t.generated.retain(|_, g| g.job_id != job_id);
        t.catalogue.extend(nodes.iter().cloned());
        Ok(())
    }

    async fn list_catalogue(&self, job_id: &str) -> Result<Vec<CatalogueNode>> {
        Ok(self
            .read()
            .catalogue
            .iter()
            .filter(|n| n.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn save_generated(&self, doc: &GeneratedDocument) -> Result<()> {
        let mut t = self.write();
        let Some(node) = t.catalogue.iter_mut().find(|n| n.id == doc.node_id) else {
            bail!("catalogue node not found: {}", doc.node_id);
        };
        node.is_completed = true;
        t.generated.insert(doc.node_id.clone(), doc.clone());
        Ok(())
    }

    async fn get_generated(&self, node_id: &str) -> Result<Option<GeneratedDocument>> {
        Ok(self.read().generated.get(node_id).cloned())
    }
}
