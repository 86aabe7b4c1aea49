//! Sync progress reporting.
//!
//! Reports what a project sync is doing (resolving, mirroring, extracting,
//! writing) so a long batch visibly moves. Progress is emitted on **stderr**
//! so the per-project status lines on stdout stay parseable for scripts.
//! Reporters are observers only: nothing they do feeds back into a sync.

use std::io::Write;

/// A single progress event for one project.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncProgressEvent {
    /// Looking the project up on the host.
    Resolving { project: String },
    /// Bringing the working copy up to date.
    Mirroring { project: String, cloning: bool },
    /// Batch extraction of the whole working copy (first import only).
    Extracting { project: String },
    /// Index writes: `n` of `total` operations applied.
    Writing { project: String, n: u64, total: u64 },
    Finished { project: String },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Whether the `n`th of `total` writes completes another fifth of the run.
///
/// Yields at most five `true`s per run, the last one on the final write.
pub fn completes_fifth(n: u64, total: u64) -> bool {
    if total == 0 || n == 0 || n > total {
        return false;
    }
    n * 5 / total > (n - 1) * 5 / total
}

/// Terse human progress: one dot per fifth of the write phase.
pub struct DotProgress;

impl SyncProgressReporter for DotProgress {
    fn report(&self, event: SyncProgressEvent) {
        let out = match &event {
            SyncProgressEvent::Writing { n, total, .. } if completes_fifth(*n, *total) => ".",
            SyncProgressEvent::Finished { .. } => "\n",
            _ => return,
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(out.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &SyncProgressEvent) -> serde_json::Value {
        match event {
            SyncProgressEvent::Resolving { project } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "resolving"
            }),
            SyncProgressEvent::Mirroring { project, cloning } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "mirroring",
                "cloning": cloning
            }),
            SyncProgressEvent::Extracting { project } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "extracting"
            }),
            SyncProgressEvent::Writing { project, n, total } => serde_json::json!({
                "event": "progress",
                "project": project,
                "phase": "writing",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Finished { project } => serde_json::json!({
                "event": "finished",
                "project": project
            }),
        }
    }
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// Progress mode for the CLI: off, dots (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Dots,
    Json,
}

impl ProgressMode {
    /// Default: dots when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Dots
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Dots => Box::new(DotProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
