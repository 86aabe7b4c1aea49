//! Index storage abstraction.
//!
//! The [`IndexStore`] trait is everything the sync engine needs from the
//! search index: project existence, per-project `(file id → content hash)`
//! snapshots, and per-file writes. Files are partitioned by their project id
//! (the routing key), so scoped reads and cascading deletes touch one project.
//!
//! | Implementation | Use |
//! |----------------|-----|
//! | [`sqlite::SqliteIndex`] | persistent index behind the CLI |
//! | [`memory::InMemoryIndex`] | tests and dry runs |

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{FileRecord, ProjectRecord};

/// Counts reported by `agora stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub projects: i64,
    pub files: i64,
    pub structured_files: i64,
    /// `(project id, file count)`, largest first.
    pub per_project: Vec<(String, i64)>,
}

/// Abstract search-index backend.
///
/// Every write is atomic per record. `create_*` fails when the id already
/// exists; `update_file` fails when it does not.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn has_project(&self, project_id: &str) -> Result<bool>;

    async fn create_project(&self, project: &ProjectRecord) -> Result<()>;

    /// Delete the project and every file routed to it, as one operation.
    ///
    /// Returns the number of file records removed.
    async fn delete_project(&self, project_id: &str) -> Result<u64>;

    /// `file id → content hash` for every file of the project.
    async fn file_hashes(&self, project_id: &str) -> Result<HashMap<String, String>>;

    async fn has_file(&self, file_id: &str) -> Result<bool>;

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>>;

    async fn create_file(&self, file: &FileRecord) -> Result<()>;

    /// Overwrite the file's metadata. `structure` and `raw_content` are
    /// replaced when the update carries them and cleared when it is demoted;
    /// otherwise the stored ones stay.
    async fn update_file(&self, file: &FileRecord) -> Result<()>;

    async fn delete_file(&self, file_id: &str) -> Result<()>;

    async fn stats(&self) -> Result<IndexStats>;
}
