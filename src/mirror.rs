//! Local working copies of indexed projects, kept with the `git` CLI.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

use crate::config::MirrorConfig;
use crate::sync::Mirror;

/// Mirrors projects by shelling out to git.
#[derive(Debug, Clone)]
pub struct GitMirror {
    git: String,
}

impl GitMirror {
    pub fn new(git: impl Into<String>) -> Self {
        Self { git: git.into() }
    }

    pub fn from_config(config: &MirrorConfig) -> Self {
        Self::new(config.git_command.clone())
    }

    fn run(&self, args: &[&str], cwd: Option<&Path>, what: &str) -> Result<()> {
        let mut cmd = Command::new(&self.git);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute '{} {}'. Is git installed?", self.git, what))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", what, stderr.trim());
        }
        Ok(())
    }

    fn clone_into(&self, url: &str, branch: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create mirror directory: {}", parent.display()))?;
        }
        let dest = dest.to_string_lossy();
        self.run(
            &["clone", "--branch", branch, "--single-branch", url, &dest],
            None,
            "clone",
        )
    }

    fn update(&self, repo_dir: &Path, branch: &str) -> Result<()> {
        self.run(&["fetch", "origin", branch], Some(repo_dir), "fetch")?;
        let remote_ref = format!("origin/{}", branch);
        self.run(&["reset", "--hard", &remote_ref], Some(repo_dir), "reset")
    }

    fn mirror_blocking(
        &self,
        project_id: &str,
        remote_url: &str,
        local_path: &Path,
        branch: &str,
    ) -> Result<()> {
        let result = if local_path.join(".git").exists() {
            debug!(project = %project_id, path = %local_path.display(), "updating working copy");
            self.update(local_path, branch)
        } else {
            info!(project = %project_id, url = %remote_url, "cloning");
            self.clone_into(remote_url, branch, local_path)
        };
        result.with_context(|| format!("Failed to mirror {}", project_id))
    }
}

#[async_trait]
impl Mirror for GitMirror {
    async fn ensure_mirrored(
        &self,
        project_id: &str,
        remote_url: &str,
        local_path: &Path,
        branch: &str,
    ) -> Result<()> {
        let mirror = self.clone();
        let project_id = project_id.to_string();
        let remote_url = remote_url.to_string();
        let local_path = local_path.to_path_buf();
        let branch = branch.to_string();

        tokio::task::spawn_blocking(move || {
            mirror.mirror_blocking(&project_id, &remote_url, &local_path, &branch)
        })
        .await
        .context("git task panicked")?
    }
}
