//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`migrate::apply_schema`](crate::migrate::apply_schema). Multi-table
//! operations run inside a single transaction.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use repo_scribe_core::models::{
    CatalogueNode, Classification, DocumentRecord, DocumentUpdate, GeneratedDocument, JobUpdate,
    RepositoryJob,
};
use repo_scribe_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

const JOB_COLUMNS: &str = "id, address, branch, kind, status, error, \
    optimized_directory_structure, classification, name, organization, created_at, updated_at";

const DOCUMENT_COLUMNS: &str = "id, job_id, working_path, status, readme, overview, \
    outline_json, changelog, created_at, updated_at";

const NODE_COLUMNS: &str = "id, job_id, parent_id, name, title, prompt, dependent_files_json, \
    sort_order, is_completed";

fn job_from_row(row: &SqliteRow) -> Result<RepositoryJob> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let classification: Option<String> = row.try_get("classification")?;
    Ok(RepositoryJob {
        id: row.try_get("id")?,
        address: row.try_get("address")?,
        branch: row.try_get("branch")?,
        kind: kind.parse()?,
        status: status.parse()?,
        error: row.try_get("error")?,
        optimized_directory_structure: row.try_get("optimized_directory_structure")?,
        classification: classification
            .map(|c| c.parse::<Classification>())
            .transpose()?,
        name: row.try_get("name")?,
        organization: row.try_get("organization")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<DocumentRecord> {
    let status: String = row.try_get("status")?;
    Ok(DocumentRecord {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        working_path: row.try_get("working_path")?,
        status: status.parse()?,
        readme: row.try_get("readme")?,
        overview: row.try_get("overview")?,
        outline_json: row.try_get("outline_json")?,
        changelog: row.try_get("changelog")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn node_from_row(row: &SqliteRow) -> Result<CatalogueNode> {
    let files_json: String = row.try_get("dependent_files_json")?;
    let dependent_files: Vec<String> = serde_json::from_str(&files_json)
        .with_context(|| "Failed to decode catalogue node dependent files")?;
    Ok(CatalogueNode {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        parent_id: row.try_get("parent_id")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        prompt: row.try_get("prompt")?,
        dependent_files,
        order: row.try_get("sort_order")?,
        is_completed: row.try_get::<i64, _>("is_completed")? != 0,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_job(&self, job: &RepositoryJob) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            JOB_COLUMNS
        ))
        .bind(&job.id)
        .bind(&job.address)
        .bind(&job.branch)
        .bind(job.kind.as_str())
        .bind(job.status.as_str())
        .bind(&job.error)
        .bind(&job.optimized_directory_structure)
        .bind(job.classification.map(|c| c.as_str()))
        .bind(&job.name)
        .bind(&job.organization)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<RepositoryJob>> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self) -> Result<Vec<RepositoryJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs ORDER BY created_at, rowid",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn next_runnable_job(&self) -> Result<Option<RepositoryJob>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM jobs
            WHERE status IN ('Pending', 'Processing')
            ORDER BY CASE status WHEN 'Processing' THEN 0 ELSE 1 END, created_at, rowid
            LIMIT 1
            "#,
            JOB_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn update_job(&self, id: &str, update: &JobUpdate) -> Result<()> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE jobs SET ");
        {
            let mut set = qb.separated(", ");
            set.push("updated_at = ").push_bind_unseparated(now_ts());
            if let Some(status) = update.status {
                set.push("status = ").push_bind_unseparated(status.as_str());
            }
            if let Some(ref error) = update.error {
                set.push("error = ").push_bind_unseparated(error.clone());
            }
            if let Some(ref s) = update.optimized_directory_structure {
                set.push("optimized_directory_structure = ")
                    .push_bind_unseparated(s.clone());
            }
            if let Some(c) = update.classification {
                set.push("classification = ").push_bind_unseparated(c.as_str());
            }
            if let Some(ref b) = update.branch {
                set.push("branch = ").push_bind_unseparated(b.clone());
            }
            if let Some(ref n) = update.name {
                set.push("name = ").push_bind_unseparated(n.clone());
            }
            if let Some(ref o) = update.organization {
                set.push("organization = ").push_bind_unseparated(o.clone());
            }
        }
        qb.push(" WHERE id = ").push_bind(id);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            bail!("job not found: {}", id);
        }
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM file_references WHERE document_id IN \
             (SELECT id FROM generated_documents WHERE job_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        for table in ["generated_documents", "catalogue_nodes", "documents"] {
            sqlx::query(&format!("DELETE FROM {} WHERE job_id = ?", table))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_document(&self, job_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE job_id = ? ORDER BY created_at LIMIT 1",
            DOCUMENT_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn insert_document(&self, doc: &DocumentRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO documents ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            DOCUMENT_COLUMNS
        ))
        .bind(&doc.id)
        .bind(&doc.job_id)
        .bind(&doc.working_path)
        .bind(doc.status.as_str())
        .bind(&doc.readme)
        .bind(&doc.overview)
        .bind(&doc.outline_json)
        .bind(&doc.changelog)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_document(&self, id: &str, update: &DocumentUpdate) -> Result<()> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE documents SET ");
        {
            let mut set = qb.separated(", ");
            set.push("updated_at = ").push_bind_unseparated(now_ts());
            if let Some(ref p) = update.working_path {
                set.push("working_path = ").push_bind_unseparated(p.clone());
            }
            if let Some(status) = update.status {
                set.push("status = ").push_bind_unseparated(status.as_str());
            }
            if let Some(ref r) = update.readme {
                set.push("readme = ").push_bind_unseparated(r.clone());
            }
            if let Some(ref o) = update.overview {
                set.push("overview = ").push_bind_unseparated(o.clone());
            }
            if let Some(ref o) = update.outline_json {
                set.push("outline_json = ").push_bind_unseparated(o.clone());
            }
            if let Some(ref c) = update.changelog {
                set.push("changelog = ").push_bind_unseparated(c.clone());
            }
        }
        qb.push(" WHERE id = ").push_bind(id);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            bail!("document not found: {}", id);
        }
        Ok(())
    }

    async fn delete_documents_for_job(&self, job_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_catalogue(&self, job_id: &str, nodes: &[CatalogueNode]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM file_references WHERE document_id IN \
             (SELECT id FROM generated_documents WHERE job_id = ?)",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM generated_documents WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM catalogue_nodes WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        for node in nodes {
            let files_json = serde_json::to_string(&node.dependent_files)?;
            sqlx::query(&format!(
                "INSERT INTO catalogue_nodes ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                NODE_COLUMNS
            ))
            .bind(&node.id)
            .bind(&node.job_id)
            .bind(&node.parent_id)
            .bind(&node.name)
            .bind(&node.title)
            .bind(&node.prompt)
            .bind(files_json)
            .bind(node.order)
            .bind(node.is_completed as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_catalogue(&self, job_id: &str) -> Result<Vec<CatalogueNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM catalogue_nodes WHERE job_id = ? ORDER BY rowid",
            NODE_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn save_generated(&self, doc: &GeneratedDocument) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query("UPDATE catalogue_nodes SET is_completed = 1 WHERE id = ?")
            .bind(&doc.node_id)
            .execute(&mut *tx)
            .await?;
        if marked.rows_affected() == 0 {
            bail!("catalogue node not found: {}", doc.node_id);
        }

        // Regeneration replaces any earlier document for the node.
        sqlx::query(
            "DELETE FROM file_references WHERE document_id IN \
             (SELECT id FROM generated_documents WHERE node_id = ?)",
        )
        .bind(&doc.node_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM generated_documents WHERE node_id = ?")
            .bind(&doc.node_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO generated_documents (id, node_id, job_id, title, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.node_id)
        .bind(&doc.job_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(doc.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, path) in doc.source_files.iter().enumerate() {
            sqlx::query("INSERT INTO file_references (document_id, path, position) VALUES (?, ?, ?)")
                .bind(&doc.id)
                .bind(path)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_generated(&self, node_id: &str) -> Result<Option<GeneratedDocument>> {
        let row = sqlx::query(
            "SELECT id, node_id, job_id, title, content, created_at \
             FROM generated_documents WHERE node_id = ?",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id")?;

        let source_files: Vec<String> = sqlx::query_scalar(
            "SELECT path FROM file_references WHERE document_id = ? ORDER BY position",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(GeneratedDocument {
            id,
            node_id: row.try_get("node_id")?,
            job_id: row.try_get("job_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            source_files,
            created_at: row.try_get("created_at")?,
        }))
    }
}
