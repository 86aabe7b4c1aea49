//! In-memory [`IndexStore`] implementation for tests and dry runs.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Every successful mutation bumps
//! a write counter so callers can assert that a sync performed no writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{FileRecord, ProjectRecord};

use super::{IndexStats, IndexStore};

#[derive(Default)]
pub struct InMemoryIndex {
    projects: RwLock<HashMap<String, ProjectRecord>>,
    files: RwLock<HashMap<String, FileRecord>>,
    writes: AtomicU64,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful mutations since construction.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// All file records of a project, ordered by id.
    pub fn files_of(&self, project_id: &str) -> Vec<FileRecord> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<FileRecord> = files
            .values()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn bump(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IndexStore for InMemoryIndex {
    async fn has_project(&self, project_id: &str) -> Result<bool> {
        let projects = self.projects.read().map_err(|_| anyhow!("index lock poisoned"))?;
        Ok(projects.contains_key(project_id))
    }

    async fn create_project(&self, project: &ProjectRecord) -> Result<()> {
        let mut projects = self.projects.write().map_err(|_| anyhow!("index lock poisoned"))?;
        if projects.contains_key(&project.id) {
            bail!("project {} already exists", project.id);
        }
        projects.insert(project.id.clone(), project.clone());
        self.bump();
        Ok(())
    }

    async fn delete_project(&self, project_id: &str) -> Result<u64> {
        let mut projects = self.projects.write().map_err(|_| anyhow!("index lock poisoned"))?;
        let mut files = self.files.write().map_err(|_| anyhow!("index lock poisoned"))?;
        let before = files.len();
        files.retain(|_, f| f.project_id != project_id);
        let removed = (before - files.len()) as u64;
        projects.remove(project_id);
        self.bump();
        Ok(removed)
    }

    async fn file_hashes(&self, project_id: &str) -> Result<HashMap<String, String>> {
        let files = self.files.read().map_err(|_| anyhow!("index lock poisoned"))?;
        Ok(files
            .values()
            .filter(|f| f.project_id == project_id)
            .map(|f| (f.id.clone(), f.sha.clone()))
            .collect())
    }

    async fn has_file(&self, file_id: &str) -> Result<bool> {
        let files = self.files.read().map_err(|_| anyhow!("index lock poisoned"))?;
        Ok(files.contains_key(file_id))
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        let files = self.files.read().map_err(|_| anyhow!("index lock poisoned"))?;
        Ok(files.get(file_id).cloned())
    }

    async fn create_file(&self, file: &FileRecord) -> Result<()> {
        let mut files = self.files.write().map_err(|_| anyhow!("index lock poisoned"))?;
        if files.contains_key(&file.id) {
            bail!("file {} already exists", file.id);
        }
        files.insert(file.id.clone(), file.clone());
        self.bump();
        Ok(())
    }

    async fn update_file(&self, file: &FileRecord) -> Result<()> {
        let mut files = self.files.write().map_err(|_| anyhow!("index lock poisoned"))?;
        let stored = files
            .get_mut(&file.id)
            .ok_or_else(|| anyhow!("file {} does not exist", file.id))?;

        let mut updated = file.clone();
        if updated.keeps_stored_structure() {
            updated.structure = stored.structure.take();
            updated.raw_content = stored.raw_content.take();
        }
        *stored = updated;
        self.bump();
        Ok(())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let mut files = self.files.write().map_err(|_| anyhow!("index lock poisoned"))?;
        files.remove(file_id);
        self.bump();
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let projects = self.projects.read().map_err(|_| anyhow!("index lock poisoned"))?;
        let files = self.files.read().map_err(|_| anyhow!("index lock poisoned"))?;

        let mut per_project: HashMap<String, i64> = HashMap::new();
        for file in files.values() {
            *per_project.entry(file.project_id.clone()).or_default() += 1;
        }
        let mut per_project: Vec<(String, i64)> = per_project.into_iter().collect();
        per_project.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(IndexStats {
            projects: projects.len() as i64,
            files: files.len() as i64,
            structured_files: files.values().filter(|f| f.has_structure()).count() as i64,
            per_project,
        })
    }
}
