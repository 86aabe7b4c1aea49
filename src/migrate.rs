//! Index schema management: `create_index` and `delete_index`.

use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index tables. Idempotent.
pub async fn create_index(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            default_branch TEXT NOT NULL,
            url TEXT NOT NULL,
            git_url TEXT NOT NULL,
            trees_url TEXT NOT NULL,
            user TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // project_id is the routing key: every file lives in exactly one project
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            extension TEXT NOT NULL,
            sha TEXT NOT NULL,
            mode TEXT NOT NULL,
            kind TEXT NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            structure_json TEXT,
            raw_content TEXT,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_project_id ON files(project_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_extension ON files(extension)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Drop the index tables and everything in them. Idempotent.
pub async fn delete_index(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DROP TABLE IF EXISTS files")
        .execute(pool)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS projects")
        .execute(pool)
        .await?;
    Ok(())
}

/// Whether the index tables exist.
pub async fn index_exists(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('projects', 'files')",
    )
    .fetch_one(pool)
    .await?;
    Ok(count == 2)
}
