//! Project synchronization: `add_project` and `delete_project`.
//!
//! [`ProjectSync`] sequences one project at a time: resolve it on the host,
//! mirror the working copy, then either reconcile an indexed project or run
//! a first import. A first import extracts the whole working copy in one
//! parser round trip and creates the project only if something in it yielded
//! structure; a failure after the project was written removes it again.
//!
//! Batches ([`ProjectSync::add_projects`], [`ProjectSync::delete_projects`])
//! keep going past per-project failures and stop only on fatal parser errors.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ExtractionConfig;
use crate::extract::{enrich_file, DirectoryStructure, ExtractError, Extractor};
use crate::models::{project_id_from_address, FileRecord, RemoteProject};
use crate::parser::ParserError;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::reconcile::{self, ReconcileReport};
use crate::store::IndexStore;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("project {0} not found")]
    NotFound(String),

    #[error("host request failed: {0:#}")]
    Host(anyhow::Error),

    #[error("mirroring failed: {0:#}")]
    Mirror(anyhow::Error),

    #[error("index operation failed: {0:#}")]
    Store(anyhow::Error),

    #[error("nothing to index in {0}")]
    NothingToIndex(String),

    #[error("extraction failed: {0}")]
    Extract(ExtractError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error("extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Fatal errors abort a whole batch, not just the current project.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Parser(e) if e.is_fatal())
    }

    /// Short failure class for status lines.
    pub fn class(&self) -> &'static str {
        match self {
            SyncError::NotFound(_) => "not found",
            SyncError::Host(_) => "host error",
            SyncError::Mirror(_) => "mirror error",
            SyncError::Store(_) => "index error",
            SyncError::NothingToIndex(_) => "nothing to index",
            SyncError::Extract(_) => "extraction error",
            SyncError::Parser(_) => "parser error",
            SyncError::Task(_) => "internal error",
        }
    }
}

impl From<ExtractError> for SyncError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Parser(e) => SyncError::Parser(e),
            other => SyncError::Extract(other),
        }
    }
}

/// Addresses from an address-list file: one per line, blank lines and
/// `#` comments skipped.
pub fn parse_address_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Where project metadata and file listings come from.
#[async_trait]
pub trait ProjectHost: Send + Sync {
    /// Metadata plus the ordered file listing, or `None` if the project does not exist.
    async fn resolve_project(&self, address: &str) -> anyhow::Result<Option<RemoteProject>>;
}

/// Keeps a local working copy of a project.
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Clone into `local_path` if there is no working copy yet, otherwise
    /// bring the existing one to the tip of `branch`.
    async fn ensure_mirrored(
        &self,
        project_id: &str,
        remote_url: &str,
        local_path: &Path,
        branch: &str,
    ) -> anyhow::Result<()>;
}

/// What a successful per-project operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// First import: files created, and how many of them carry structure.
    Imported { files: usize, structured: usize },
    Reconciled(ReconcileReport),
    Deleted { files: u64 },
    /// Delete of a project that was never indexed.
    NotIndexed,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Imported { files, structured } => {
                write!(f, "imported {} files ({} with structure)", files, structured)
            }
            SyncOutcome::Reconciled(r) => write!(
                f,
                "{} created, {} updated, {} deleted, {} unchanged",
                r.created, r.updated, r.deleted, r.unchanged
            ),
            SyncOutcome::Deleted { files } => write!(f, "deleted with {} files", files),
            SyncOutcome::NotIndexed => write!(f, "not indexed"),
        }
    }
}

/// Result of a batch of add or delete operations, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<(String, SyncOutcome)>,
    pub failed: Vec<(String, String)>,
    /// Set when a fatal error stopped the batch early.
    pub aborted: Option<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_none()
    }

    /// Record one result; returns false when the batch must stop.
    fn record(&mut self, address: &str, result: Result<SyncOutcome, SyncError>) -> bool {
        match result {
            Ok(outcome) => {
                self.succeeded.push((address.to_string(), outcome));
                true
            }
            Err(err) if err.is_fatal() => {
                self.aborted = Some(format!("{}: {}", address, err));
                false
            }
            Err(err) => {
                self.failed.push((address.to_string(), err.to_string()));
                true
            }
        }
    }
}

/// `path` made absolute against the working directory, with `.` and `..`
/// resolved lexically. The parser worker answers with absolute paths, so
/// every path it is sent must already be one.
pub fn absolute_dir(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Sequences add/delete operations over the host, mirror, parser and index.
pub struct ProjectSync {
    host: Box<dyn ProjectHost>,
    mirror: Box<dyn Mirror>,
    store: Arc<dyn IndexStore>,
    extractor: Arc<Mutex<Extractor>>,
    policy: ExtractionConfig,
    source_dir: PathBuf,
    progress: Box<dyn SyncProgressReporter>,
}

impl ProjectSync {
    pub fn new(
        host: Box<dyn ProjectHost>,
        mirror: Box<dyn Mirror>,
        store: Arc<dyn IndexStore>,
        extractor: Extractor,
        policy: ExtractionConfig,
        source_dir: PathBuf,
        progress: Box<dyn SyncProgressReporter>,
    ) -> Self {
        let source_dir = match absolute_dir(&source_dir) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(dir = %source_dir.display(), error = %e, "cannot make source directory absolute");
                source_dir
            }
        };
        Self {
            host,
            mirror,
            store,
            extractor: Arc::new(Mutex::new(extractor)),
            policy,
            source_dir,
            progress,
        }
    }

    /// Run parser-bound work on the blocking pool.
    async fn with_extractor<T, F>(&self, work: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Extractor, &ExtractionConfig) -> Result<T, SyncError> + Send + 'static,
    {
        let extractor = Arc::clone(&self.extractor);
        let policy = self.policy.clone();
        tokio::task::spawn_blocking(move || {
            let mut extractor = extractor.lock().unwrap_or_else(|e| e.into_inner());
            work(&mut extractor, &policy)
        })
        .await?
    }

    /// Local working copy of `project_id` (`{source_dir}/{owner}/{name}`).
    pub fn local_path(&self, project_id: &str) -> PathBuf {
        project_id
            .split('/')
            .fold(self.source_dir.clone(), |path, segment| path.join(segment))
    }

    /// Bring one project's index entries in line with the host.
    pub async fn sync_project(&mut self, address: &str) -> Result<SyncOutcome, SyncError> {
        let project_id = project_id_from_address(address)
            .ok_or_else(|| SyncError::NotFound(address.to_string()))?;

        self.progress.report(SyncProgressEvent::Resolving {
            project: project_id.clone(),
        });
        let remote = self
            .host
            .resolve_project(address)
            .await
            .map_err(SyncError::Host)?
            .ok_or_else(|| SyncError::NotFound(project_id.clone()))?;

        let local = self.local_path(&project_id);
        self.progress.report(SyncProgressEvent::Mirroring {
            project: project_id.clone(),
            cloning: !local.join(".git").exists(),
        });
        self.mirror
            .ensure_mirrored(
                &project_id,
                &remote.project.git_url,
                &local,
                &remote.project.default_branch,
            )
            .await
            .map_err(SyncError::Mirror)?;

        let indexed = self
            .store
            .has_project(&project_id)
            .await
            .map_err(SyncError::Store)?;
        let outcome = if indexed {
            self.reconcile_existing(&project_id, &remote, &local).await?
        } else {
            self.first_import(&project_id, remote, &local).await?
        };

        self.progress.report(SyncProgressEvent::Finished {
            project: project_id.clone(),
        });
        info!(project = %project_id, outcome = %outcome, "project synced");
        Ok(outcome)
    }

    async fn reconcile_existing(
        &mut self,
        project_id: &str,
        remote: &RemoteProject,
        local: &Path,
    ) -> Result<SyncOutcome, SyncError> {
        let mut plan = reconcile::load_plan(self.store.as_ref(), project_id, &remote.files).await?;
        if !plan.to_create.is_empty() || !plan.to_update.is_empty() {
            let local = local.to_path_buf();
            plan = self
                .with_extractor(move |extractor, policy| {
                    plan.prepare(|file| {
                        let source = local.join(&file.path);
                        enrich_file(file, &source, policy, extractor, None)
                    })?;
                    Ok(plan)
                })
                .await?;
        }

        let report =
            reconcile::apply(self.store.as_ref(), project_id, plan, self.progress.as_ref())
                .await?;
        Ok(SyncOutcome::Reconciled(report))
    }

    async fn first_import(
        &mut self,
        project_id: &str,
        remote: RemoteProject,
        local: &Path,
    ) -> Result<SyncOutcome, SyncError> {
        self.progress.report(SyncProgressEvent::Extracting {
            project: project_id.to_string(),
        });
        let local = local.to_path_buf();
        let entries = remote.files.clone();
        let id = project_id.to_string();
        let files = self
            .with_extractor(move |extractor, policy| {
                let batch: DirectoryStructure = match extractor.extract_directory(&local) {
                    Ok(batch) => batch,
                    Err(ExtractError::Empty(_)) => return Err(SyncError::NothingToIndex(id)),
                    Err(err) => return Err(err.into()),
                };
                if batch.is_empty() {
                    return Err(SyncError::NothingToIndex(id));
                }

                let mut files = Vec::with_capacity(entries.len());
                for entry in &entries {
                    let mut file = FileRecord::from_remote(&id, entry);
                    let source = local.join(&entry.path);
                    enrich_file(&mut file, &source, policy, extractor, Some(&batch))?;
                    files.push(file);
                }
                Ok(files)
            })
            .await?;
        let structured = files.iter().filter(|f| f.has_structure()).count();
        if structured == 0 {
            return Err(SyncError::NothingToIndex(project_id.to_string()));
        }

        self.store
            .create_project(&remote.project)
            .await
            .map_err(SyncError::Store)?;
        if let Err(err) = self.create_files(project_id, &files).await {
            warn!(project = %project_id, error = %err, "first import failed, rolling back");
            if let Err(cleanup) = self.store.delete_project(project_id).await {
                warn!(project = %project_id, error = %cleanup, "rollback failed");
            }
            return Err(err);
        }

        Ok(SyncOutcome::Imported {
            files: files.len(),
            structured,
        })
    }

    async fn create_files(&self, project_id: &str, files: &[FileRecord]) -> Result<(), SyncError> {
        let total = files.len() as u64;
        for (i, file) in files.iter().enumerate() {
            self.store
                .create_file(file)
                .await
                .map_err(SyncError::Store)?;
            self.progress.report(SyncProgressEvent::Writing {
                project: project_id.to_string(),
                n: i as u64 + 1,
                total,
            });
        }
        Ok(())
    }

    /// Remove a project and all of its files from the index.
    pub async fn delete_project(&mut self, address: &str) -> Result<SyncOutcome, SyncError> {
        let project_id = project_id_from_address(address)
            .ok_or_else(|| SyncError::NotFound(address.to_string()))?;

        let indexed = self
            .store
            .has_project(&project_id)
            .await
            .map_err(SyncError::Store)?;
        if !indexed {
            return Ok(SyncOutcome::NotIndexed);
        }

        let files = self
            .store
            .delete_project(&project_id)
            .await
            .map_err(SyncError::Store)?;
        self.progress.report(SyncProgressEvent::Finished {
            project: project_id.clone(),
        });
        info!(project = %project_id, files, "project deleted");
        Ok(SyncOutcome::Deleted { files })
    }

    /// Sync each address in order. `on_result` sees every result as it happens.
    pub async fn add_projects<F>(&mut self, addresses: &[String], mut on_result: F) -> BatchReport
    where
        F: FnMut(&str, &Result<SyncOutcome, SyncError>),
    {
        let mut report = BatchReport::default();
        for address in addresses {
            let result = self.sync_project(address).await;
            on_result(address, &result);
            if !report.record(address, result) {
                break;
            }
        }
        report
    }

    /// Delete each address in order. `on_result` sees every result as it happens.
    pub async fn delete_projects<F>(
        &mut self,
        addresses: &[String],
        mut on_result: F,
    ) -> BatchReport
    where
        F: FnMut(&str, &Result<SyncOutcome, SyncError>),
    {
        let mut report = BatchReport::default();
        for address in addresses {
            let result = self.delete_project(address).await;
            on_result(address, &result);
            if !report.record(address, result) {
                break;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::path_key;
    use crate::extract::tests::ScriptedTransport;
    use crate::models::{ProjectRecord, RemoteFile};
    use crate::parser::RequestKind;
    use crate::progress::NoProgress;
    use crate::store::memory::InMemoryIndex;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeHost {
        projects: Arc<Mutex<HashMap<String, RemoteProject>>>,
    }

    impl FakeHost {
        fn publish(&self, id: &str, files: &[(&str, &str)]) {
            let (user, name) = id.split_once('/').unwrap();
            let project = ProjectRecord {
                id: id.to_string(),
                default_branch: "main".to_string(),
                url: format!("https://api.example.test/repos/{}", id),
                git_url: format!("https://example.test/{}.git", id),
                trees_url: format!("https://api.example.test/repos/{}/git/trees{{/sha}}", id),
                user: user.to_string(),
                name: name.to_string(),
            };
            let files = files
                .iter()
                .map(|(path, sha)| RemoteFile {
                    path: path.to_string(),
                    sha: sha.to_string(),
                    mode: "100644".to_string(),
                    kind: "blob".to_string(),
                    url: String::new(),
                })
                .collect();
            self.projects
                .lock()
                .unwrap()
                .insert(id.to_string(), RemoteProject { project, files });
        }
    }

    #[async_trait]
    impl ProjectHost for FakeHost {
        async fn resolve_project(&self, address: &str) -> anyhow::Result<Option<RemoteProject>> {
            let id = project_id_from_address(address).unwrap_or_default();
            Ok(self.projects.lock().unwrap().get(&id).cloned())
        }
    }

    #[derive(Clone, Default)]
    struct FakeMirror {
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Mirror for FakeMirror {
        async fn ensure_mirrored(
            &self,
            project_id: &str,
            _remote_url: &str,
            _local_path: &Path,
            _branch: &str,
        ) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(project_id.to_string());
            if self.fail {
                anyhow::bail!("clone of {} failed", project_id);
            }
            Ok(())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        host: FakeHost,
        mirror: FakeMirror,
        transport: ScriptedTransport,
        store: Arc<InMemoryIndex>,
        sync: ProjectSync,
    }

    fn fixture_with(mirror: FakeMirror) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tmp.path().to_path_buf();
        fixture_in(tmp, source_dir, mirror)
    }

    fn fixture_in(tmp: tempfile::TempDir, source_dir: PathBuf, mirror: FakeMirror) -> Fixture {
        let host = FakeHost::default();
        let transport = ScriptedTransport::default();
        let store = Arc::new(InMemoryIndex::new());
        let sync = ProjectSync::new(
            Box::new(host.clone()),
            Box::new(mirror.clone()),
            store.clone(),
            Extractor::new(Box::new(transport.clone())),
            ExtractionConfig::default(),
            source_dir,
            Box::new(NoProgress),
        );
        Fixture {
            _tmp: tmp,
            host,
            mirror,
            transport,
            store,
            sync,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeMirror::default())
    }

    impl Fixture {
        /// Write a source file into the project's working copy.
        fn checkout(&self, project_id: &str, path: &str, text: &str) -> PathBuf {
            let full = self.sync.local_path(project_id).join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, text).unwrap();
            full
        }

        /// Script a directory extraction of the working copy covering `paths`.
        fn script_batch(&self, project_id: &str, paths: &[&str]) {
            let root = self.sync.local_path(project_id);
            let body: serde_json::Map<String, serde_json::Value> = paths
                .iter()
                .map(|p| {
                    (
                        path_key(&root.join(p)),
                        serde_json::json!({"class": {"name": p}}),
                    )
                })
                .collect();
            self.transport.respond(
                RequestKind::Directory,
                &path_key(&root),
                &serde_json::Value::Object(body).to_string(),
            );
        }
    }

    #[tokio::test]
    async fn first_import_creates_project_and_files() {
        let mut fx = fixture();
        fx.host
            .publish("octo/demo", &[("src/A.java", "h1"), ("README.md", "h2")]);
        fx.checkout("octo/demo", "src/A.java", "class A {}");
        fx.script_batch("octo/demo", &["src/A.java"]);

        let outcome = fx
            .sync
            .sync_project("https://github.com/octo/demo")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Imported {
                files: 2,
                structured: 1
            }
        );
        assert!(fx.store.has_project("octo/demo").await.unwrap());
        let a = fx.store.get_file("octo/demo/src/A.java").await.unwrap().unwrap();
        assert!(a.has_structure());
        assert_eq!(a.raw_content.as_deref(), Some("class A {}"));
        let readme = fx.store.get_file("octo/demo/README.md").await.unwrap().unwrap();
        assert_eq!(readme.extension, "md");
        assert_eq!(fx.mirror.calls.lock().unwrap().clone(), vec!["octo/demo"]);
        // one directory round trip, no per-file requests
        assert_eq!(fx.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn empty_extraction_creates_no_project() {
        let mut fx = fixture();
        fx.host.publish("octo/demo", &[("src/A.java", "h1")]);
        fx.checkout("octo/demo", "src/A.java", "class A {");

        let err = fx.sync.sync_project("octo/demo").await.unwrap_err();
        assert!(matches!(err, SyncError::NothingToIndex(_)));
        assert!(!err.is_fatal());
        assert!(!fx.store.has_project("octo/demo").await.unwrap());
        assert_eq!(fx.store.writes(), 0);
    }

    #[tokio::test]
    async fn import_without_any_structured_file_creates_no_project() {
        let mut fx = fixture();
        fx.host.publish("octo/demo", &[("docs/guide.md", "h1")]);
        fx.checkout("octo/demo", "Other.java", "class Other {}");
        fx.script_batch("octo/demo", &["Other.java"]);

        let err = fx.sync.sync_project("octo/demo").await.unwrap_err();
        assert!(matches!(err, SyncError::NothingToIndex(_)));
        assert_eq!(fx.store.writes(), 0);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let mut fx = fixture();
        let err = fx.sync.sync_project("octo/missing").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(ref id) if id == "octo/missing"));
        assert!(fx.mirror.calls.lock().unwrap().is_empty());
        assert_eq!(fx.store.writes(), 0);
    }

    #[tokio::test]
    async fn mirror_failure_leaves_no_state() {
        let mut fx = fixture_with(FakeMirror {
            fail: true,
            ..Default::default()
        });
        fx.host.publish("octo/demo", &[("A.java", "h1")]);

        let err = fx.sync.sync_project("octo/demo").await.unwrap_err();
        assert!(matches!(err, SyncError::Mirror(_)));
        assert_eq!(fx.store.writes(), 0);
    }

    #[tokio::test]
    async fn indexed_project_is_reconciled_per_file() {
        let mut fx = fixture();
        fx.host
            .publish("octo/demo", &[("A.java", "h1"), ("Gone.java", "h9")]);
        fx.checkout("octo/demo", "A.java", "class A {}");
        fx.checkout("octo/demo", "Gone.java", "class Gone {}");
        fx.script_batch("octo/demo", &["A.java", "Gone.java"]);
        fx.sync.sync_project("octo/demo").await.unwrap();

        fx.host
            .publish("octo/demo", &[("A.java", "h2"), ("B.java", "h3")]);
        let b = fx.checkout("octo/demo", "B.java", "class B {}");
        let a = fx.sync.local_path("octo/demo").join("A.java");
        fx.transport
            .respond(RequestKind::File, &path_key(&a), r#"{"class":{"name":"A2"}}"#);
        fx.transport
            .respond(RequestKind::File, &path_key(&b), r#"{"class":{"name":"B"}}"#);

        let outcome = fx.sync.sync_project("octo/demo").await.unwrap();
        let SyncOutcome::Reconciled(report) = outcome else {
            panic!("expected reconcile, got {:?}", outcome);
        };
        assert_eq!((report.created, report.updated, report.deleted), (1, 1, 1));

        let a = fx.store.get_file("octo/demo/A.java").await.unwrap().unwrap();
        assert_eq!(a.sha, "h2");
        assert_eq!(a.structure.unwrap().get("class").unwrap()["name"], "A2");
        assert!(fx.store.has_file("octo/demo/B.java").await.unwrap());
        assert!(!fx.store.has_file("octo/demo/Gone.java").await.unwrap());

        let writes = fx.store.writes();
        let again = fx.sync.sync_project("octo/demo").await.unwrap();
        assert_eq!(
            again,
            SyncOutcome::Reconciled(ReconcileReport {
                unchanged: 2,
                ..Default::default()
            })
        );
        assert_eq!(fx.store.writes(), writes);
    }

    #[tokio::test]
    async fn failed_reparse_on_update_drops_the_old_structure() {
        let mut fx = fixture();
        fx.host.publish("octo/demo", &[("A.java", "h1")]);
        fx.checkout("octo/demo", "A.java", "class A {}");
        fx.script_batch("octo/demo", &["A.java"]);
        fx.sync.sync_project("octo/demo").await.unwrap();
        let a = fx.store.get_file("octo/demo/A.java").await.unwrap().unwrap();
        assert!(a.has_structure());

        // no file response scripted: both attempts come back empty
        fx.host.publish("octo/demo", &[("A.java", "h2")]);
        let outcome = fx.sync.sync_project("octo/demo").await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Reconciled(ReconcileReport {
                updated: 1,
                ..Default::default()
            })
        );

        let a = fx.store.get_file("octo/demo/A.java").await.unwrap().unwrap();
        assert_eq!(a.sha, "h2");
        assert_eq!(a.extension, "ljava");
        assert!(!a.has_structure());
        assert!(a.raw_content.is_none());
    }

    /// `target` spelled relative to the current directory.
    #[cfg(unix)]
    fn relative_to_cwd(target: &Path) -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        let mut relative = PathBuf::new();
        for _ in cwd.components().skip(1) {
            relative.push("..");
        }
        relative.push(target.strip_prefix("/").unwrap());
        relative
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relative_source_dir_is_sent_to_the_parser_as_absolute() {
        let tmp = tempfile::tempdir().unwrap();
        let relative = relative_to_cwd(tmp.path());
        assert!(relative.is_relative());
        let root = tmp.path().join("octo").join("demo");

        let mut fx = fixture_in(tmp, relative, FakeMirror::default());
        assert_eq!(fx.sync.local_path("octo/demo"), root);

        fx.host
            .publish("octo/demo", &[("A.java", "h1"), ("B.java", "h2")]);
        fx.checkout("octo/demo", "A.java", "class A {}");
        fx.checkout("octo/demo", "B.java", "class B {}");
        fx.script_batch("octo/demo", &["A.java", "B.java"]);

        let outcome = fx.sync.sync_project("octo/demo").await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Imported {
                files: 2,
                structured: 2
            }
        );
        // the directory result is keyed by the same absolute paths the files are looked up by
        assert_eq!(
            fx.transport.calls(),
            vec![(RequestKind::Directory, path_key(&root))]
        );
    }

    #[test]
    fn absolute_dir_resolves_dot_segments() {
        let dir = absolute_dir(Path::new("sources/./octo/../demo")).unwrap();
        assert!(dir.is_absolute());
        assert_eq!(
            dir,
            std::env::current_dir().unwrap().join("sources").join("demo")
        );
    }

    #[tokio::test]
    async fn delete_removes_project_and_files() {
        let mut fx = fixture();
        fx.host.publish("octo/demo", &[("A.java", "h1")]);
        fx.checkout("octo/demo", "A.java", "class A {}");
        fx.script_batch("octo/demo", &["A.java"]);
        fx.sync.sync_project("octo/demo").await.unwrap();

        let outcome = fx.sync.delete_project("octo/demo").await.unwrap();
        assert_eq!(outcome, SyncOutcome::Deleted { files: 1 });
        assert!(!fx.store.has_project("octo/demo").await.unwrap());
        assert!(fx.store.files_of("octo/demo").is_empty());

        let outcome = fx.sync.delete_project("octo/demo").await.unwrap();
        assert_eq!(outcome, SyncOutcome::NotIndexed);
    }

    #[tokio::test]
    async fn batch_continues_past_project_failures() {
        let mut fx = fixture();
        fx.host.publish("octo/demo", &[("A.java", "h1")]);
        fx.checkout("octo/demo", "A.java", "class A {}");
        fx.script_batch("octo/demo", &["A.java"]);

        let addresses = vec!["octo/missing".to_string(), "octo/demo".to_string()];
        let mut seen = Vec::new();
        let report = fx
            .sync
            .add_projects(&addresses, |address, result| {
                seen.push((address.to_string(), result.is_ok()))
            })
            .await;

        assert_eq!(
            seen,
            vec![
                ("octo/missing".to_string(), false),
                ("octo/demo".to_string(), true)
            ]
        );
        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.succeeded.len(), 1);
        assert!(report.aborted.is_none());
    }

    #[tokio::test]
    async fn fatal_parser_error_stops_the_batch() {
        let mut fx = fixture();
        fx.host.publish("octo/one", &[("A.java", "h1")]);
        fx.host.publish("octo/two", &[("A.java", "h1")]);
        *fx.transport.fatal.lock().unwrap() = true;

        let addresses = vec!["octo/one".to_string(), "octo/two".to_string()];
        let report = fx.sync.add_projects(&addresses, |_, _| {}).await;

        assert!(report.aborted.is_some());
        assert!(report.succeeded.is_empty());
        assert_eq!(fx.mirror.calls.lock().unwrap().clone(), vec!["octo/one"]);
    }

    #[test]
    fn address_list_skips_blanks_and_comments() {
        let text = "# mirrors\nocto/demo\n\n  https://github.com/octo/other  \n#octo/skipped\n";
        assert_eq!(
            parse_address_list(text),
            vec!["octo/demo", "https://github.com/octo/other"]
        );
    }

    #[test]
    fn local_path_nests_owner_and_name() {
        let fx = fixture();
        let path = fx.sync.local_path("octo/demo");
        assert!(path.ends_with("octo/demo"));
        assert!(path.starts_with(fx._tmp.path()));
    }
}
