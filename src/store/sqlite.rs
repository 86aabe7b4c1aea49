//! SQLite-backed [`IndexStore`].
//!
//! Projects and files live in two tables created by [`crate::migrate`].
//! `files.project_id` carries the routing key and is indexed, so per-project
//! reads and cascading deletes stay scoped to one project.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{FileRecord, ProjectRecord, StructuralDocument};
use crate::{db, migrate};

use super::{IndexStats, IndexStore};

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the index at `path`, failing if its tables were never created.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        if !migrate::index_exists(&pool).await? {
            bail!(
                "index at {} does not exist; run create_index first",
                path.display()
            );
        }
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn structure_json(file: &FileRecord) -> Result<Option<String>> {
    file.structure
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .with_context(|| format!("Failed to serialize structure of {}", file.id))
}

fn row_to_file(row: &SqliteRow) -> Result<FileRecord> {
    let id: String = row.get("id");
    let structure: Option<String> = row.get("structure_json");
    let structure = structure
        .map(|json| serde_json::from_str::<StructuralDocument>(&json))
        .transpose()
        .with_context(|| format!("Stored structure of {} is not valid JSON", id))?;

    Ok(FileRecord {
        id,
        project_id: row.get("project_id"),
        path: row.get("path"),
        name: row.get("name"),
        extension: row.get("extension"),
        sha: row.get("sha"),
        mode: row.get("mode"),
        kind: row.get("kind"),
        url: row.get("url"),
        structure,
        raw_content: row.get("raw_content"),
        demoted: false,
    })
}

#[async_trait]
impl IndexStore for SqliteIndex {
    async fn has_project(&self, project_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn create_project(&self, project: &ProjectRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, default_branch, url, git_url, trees_url, user, name, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.default_branch)
        .bind(&project.url)
        .bind(&project.git_url)
        .bind(&project.trees_url)
        .bind(&project.user)
        .bind(&project.name)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create project {}", project.id))?;
        Ok(())
    }

    async fn delete_project(&self, project_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM files WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }

    async fn file_hashes(&self, project_id: &str) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, sha FROM files WHERE project_id = ?")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn has_file(&self, file_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE id = ?")
            .bind(file_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, path, name, extension, sha, mode, kind, url, structure_json, raw_content
            FROM files WHERE id = ?
            "#,
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_file).transpose()
    }

    async fn create_file(&self, file: &FileRecord) -> Result<()> {
        let structure = structure_json(file)?;
        sqlx::query(
            r#"
            INSERT INTO files (id, project_id, path, name, extension, sha, mode, kind, url, structure_json, raw_content, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.project_id)
        .bind(&file.path)
        .bind(&file.name)
        .bind(&file.extension)
        .bind(&file.sha)
        .bind(&file.mode)
        .bind(&file.kind)
        .bind(&file.url)
        .bind(&structure)
        .bind(&file.raw_content)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create file {}", file.id))?;
        Ok(())
    }

    async fn update_file(&self, file: &FileRecord) -> Result<()> {
        let structure = structure_json(file)?;
        let keep = file.keeps_stored_structure();
        let updated = sqlx::query(
            r#"
            UPDATE files SET
                project_id = ?,
                path = ?,
                name = ?,
                extension = ?,
                sha = ?,
                mode = ?,
                kind = ?,
                url = ?,
                structure_json = CASE WHEN ? THEN structure_json ELSE ? END,
                raw_content = CASE WHEN ? THEN raw_content ELSE ? END,
                indexed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&file.project_id)
        .bind(&file.path)
        .bind(&file.name)
        .bind(&file.extension)
        .bind(&file.sha)
        .bind(&file.mode)
        .bind(&file.kind)
        .bind(&file.url)
        .bind(keep)
        .bind(&structure)
        .bind(keep)
        .bind(&file.raw_content)
        .bind(chrono::Utc::now().timestamp())
        .bind(&file.id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update file {}", file.id))?
        .rows_affected();

        if updated == 0 {
            bail!("file {} does not exist", file.id);
        }
        Ok(())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete file {}", file_id))?;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.pool)
            .await?;
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        let structured_files: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE structure_json IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        let per_project: Vec<(String, i64)> = sqlx::query_as(
            "SELECT project_id, COUNT(*) AS n FROM files GROUP BY project_id ORDER BY n DESC, project_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(IndexStats {
            projects,
            files,
            structured_files,
            per_project,
        })
    }
}
