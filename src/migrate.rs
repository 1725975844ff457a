//! Idempotent schema migrations.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index if it does not already exist.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            address TEXT NOT NULL,
            branch TEXT,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            optimized_directory_structure TEXT,
            classification TEXT,
            name TEXT,
            organization TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create documents table (one working copy record per job)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            working_path TEXT NOT NULL,
            status TEXT NOT NULL,
            readme TEXT,
            overview TEXT,
            outline_json TEXT,
            changelog TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create catalogue_nodes table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalogue_nodes (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            parent_id TEXT,
            name TEXT NOT NULL,
            title TEXT NOT NULL,
            prompt TEXT NOT NULL DEFAULT '',
            dependent_files_json TEXT NOT NULL DEFAULT '[]',
            sort_order INTEGER NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create generated_documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generated_documents (
            id TEXT PRIMARY KEY,
            node_id TEXT NOT NULL UNIQUE,
            job_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (node_id) REFERENCES catalogue_nodes(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create file_references table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_references (
            document_id TEXT NOT NULL,
            path TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (document_id, position),
            FOREIGN KEY (document_id) REFERENCES generated_documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_job_id ON documents(job_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_catalogue_nodes_job_id ON catalogue_nodes(job_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_generated_documents_job_id ON generated_documents(job_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
