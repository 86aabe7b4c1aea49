//! Reconciliation of one project's indexed files against a fresh listing.
//!
//! [`plan`] diffs the remote listing against the index's `id → hash`
//! snapshot; [`ReconciliationPlan::prepare`] fills in the records to be
//! written (extraction happens there); [`apply`] drives the writes through an
//! [`IndexStore`]. Creates and updates go first, in listing order. Deletes
//! run last and only once every create and update has succeeded, so an
//! aborted run never removes a file whose replacement was not written.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::models::{FileRecord, RemoteFile};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::store::IndexStore;
use crate::sync::SyncError;

/// Writes needed to bring one project's index entries in line with the host.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconciliationPlan {
    /// Listed files the index does not know, in listing order.
    pub to_create: Vec<FileRecord>,
    /// Listed files whose hash differs from the indexed one, in listing order.
    pub to_update: Vec<FileRecord>,
    /// Indexed ids missing from the listing, sorted.
    pub to_delete: Vec<String>,
    /// Listed files whose hash is unchanged.
    pub unchanged: usize,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub fn write_count(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }

    /// Run `prepare` on every record to be written, creates first.
    /// Stops at the first error.
    pub fn prepare<E>(
        &mut self,
        mut prepare: impl FnMut(&mut FileRecord) -> Result<(), E>,
    ) -> Result<(), E> {
        for file in self.to_create.iter_mut().chain(self.to_update.iter_mut()) {
            prepare(file)?;
        }
        Ok(())
    }
}

/// Counts of what [`apply`] did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Diff `listing` against the indexed `id → hash` map of `project_id`.
///
/// Each indexed id matched by the listing is consumed; whatever is left
/// afterwards is gone from the host and gets deleted.
pub fn plan(
    project_id: &str,
    listing: &[RemoteFile],
    mut indexed: HashMap<String, String>,
) -> ReconciliationPlan {
    let mut out = ReconciliationPlan::default();

    for remote in listing {
        let file = FileRecord::from_remote(project_id, remote);
        match indexed.remove(&file.id) {
            Some(hash) if hash == file.sha => out.unchanged += 1,
            Some(_) => out.to_update.push(file),
            None => out.to_create.push(file),
        }
    }

    out.to_delete = indexed.into_keys().collect();
    out.to_delete.sort();
    out
}

/// Apply `plan` to `store`. The first failing write aborts the run before
/// any delete is issued.
pub async fn apply(
    store: &dyn IndexStore,
    project_id: &str,
    plan: ReconciliationPlan,
    progress: &dyn SyncProgressReporter,
) -> Result<ReconcileReport, SyncError> {
    let total = plan.write_count() as u64;
    let mut report = ReconcileReport {
        unchanged: plan.unchanged,
        ..Default::default()
    };
    let mut n = 0u64;
    let step = |n: &mut u64| {
        *n += 1;
        progress.report(SyncProgressEvent::Writing {
            project: project_id.to_string(),
            n: *n,
            total,
        });
    };

    for file in plan.to_create {
        store.create_file(&file).await.map_err(SyncError::Store)?;
        report.created += 1;
        step(&mut n);
    }

    for file in plan.to_update {
        store.update_file(&file).await.map_err(SyncError::Store)?;
        report.updated += 1;
        step(&mut n);
    }

    for id in &plan.to_delete {
        debug!(file = %id, "deleting file no longer listed");
        store.delete_file(id).await.map_err(SyncError::Store)?;
        report.deleted += 1;
        step(&mut n);
    }

    info!(
        project = %project_id,
        created = report.created,
        updated = report.updated,
        deleted = report.deleted,
        unchanged = report.unchanged,
        "reconciled"
    );
    Ok(report)
}

/// Load the project's snapshot from `store` and plan against `listing`.
pub async fn load_plan(
    store: &dyn IndexStore,
    project_id: &str,
    listing: &[RemoteFile],
) -> Result<ReconciliationPlan, SyncError> {
    let indexed = store
        .file_hashes(project_id)
        .await
        .map_err(SyncError::Store)?;
    Ok(plan(project_id, listing, indexed))
}
