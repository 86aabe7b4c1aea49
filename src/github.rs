//! GitHub host client.
//!
//! Resolves a project address to its metadata and full recursive file
//! listing with three calls: the repository, its default branch, and the
//! git tree of the branch head.
//!
//! Every response's rate-limit headers are checked. When the remaining
//! budget drops below the configured floor the client announces the resume
//! time and sleeps until the window resets. Network errors and 5xx responses
//! are retried with exponential backoff; 404 means the project does not exist.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GithubConfig;
use crate::models::{project_id_from_address, ProjectRecord, RemoteFile, RemoteProject};
use crate::sync::ProjectHost;

const USER_AGENT: &str = concat!("agora-sync/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    default_branch: String,
    url: String,
    clone_url: String,
    trees_url: String,
    owner: OwnerResponse,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<RemoteFile>,
    #[serde(default)]
    truncated: bool,
}

pub struct GithubClient {
    client: reqwest::Client,
    config: GithubConfig,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            token: config.resolved_token(),
        })
    }

    /// API URL of the repository an address points at.
    ///
    /// Accepts API URLs, web URLs and bare `owner/name`.
    pub fn repo_url(&self, address: &str) -> Option<String> {
        let project_id = project_id_from_address(address)?;
        Some(format!(
            "{}/repos/{}",
            self.config.api_url.trim_end_matches('/'),
            project_id
        ))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.config.username, &self.token) {
            (Some(user), Some(token)) => request.basic_auth(user, Some(token)),
            (None, Some(token)) => request.bearer_auth(token),
            _ => request,
        }
    }

    /// GET `url` as JSON. `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            debug!(url, attempt, "GET");
            let resp = self
                .authorize(self.client.get(url))
                .header("Accept", "application/vnd.github+json")
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    self.respect_rate_limit(url, response.headers()).await;

                    if status.is_success() {
                        return Ok(Some(response.json().await?));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    if status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("GitHub API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("GitHub API error {} for {}: {}", status, url, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("GitHub request failed after retries")))
    }

    async fn respect_rate_limit(&self, url: &str, headers: &HeaderMap) {
        let now = chrono::Utc::now().timestamp();
        let Some(pause) = rate_limit_pause(&self.config, url, headers, now) else {
            return;
        };

        let resume = chrono::Local::now() + chrono::Duration::seconds(pause.as_secs() as i64);
        eprintln!(
            "GitHub rate limit nearly exhausted; resuming at {}",
            resume.format("%H:%M")
        );
        warn!(url, seconds = pause.as_secs(), "waiting for rate limit reset");
        tokio::time::sleep(pause).await;
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// How long to wait before the next request, if the remaining budget is
/// below the floor for this endpoint.
///
/// Search endpoints have their own, smaller budget and grace period.
pub fn rate_limit_pause(
    config: &GithubConfig,
    url: &str,
    headers: &HeaderMap,
    now: i64,
) -> Option<Duration> {
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset = header_u64(headers, "x-ratelimit-reset")? as i64;

    let (floor, grace) = if url.contains("/search/") {
        (config.search_min_remaining, config.search_reset_grace_secs)
    } else {
        (config.min_remaining, config.reset_grace_secs)
    };
    if remaining >= floor {
        return None;
    }

    let until_reset = (reset - now).max(0) as u64;
    Some(Duration::from_secs(until_reset + grace))
}

#[async_trait]
impl ProjectHost for GithubClient {
    async fn resolve_project(&self, address: &str) -> Result<Option<RemoteProject>> {
        let Some(project_id) = project_id_from_address(address) else {
            return Ok(None);
        };
        let Some(repo_url) = self.repo_url(address) else {
            return Ok(None);
        };

        let Some(repo) = self.get_json::<RepoResponse>(&repo_url).await? else {
            return Ok(None);
        };

        let branch_url = format!("{}/branches/{}", repo_url, repo.default_branch);
        let Some(branch) = self.get_json::<BranchResponse>(&branch_url).await? else {
            bail!(
                "default branch {} of {} not found",
                repo.default_branch,
                project_id
            );
        };

        let tree_url = format!("{}/git/trees/{}?recursive=1", repo_url, branch.commit.sha);
        let Some(tree) = self.get_json::<TreeResponse>(&tree_url).await? else {
            bail!("tree {} of {} not found", branch.commit.sha, project_id);
        };
        if tree.truncated {
            warn!(project = %project_id, entries = tree.tree.len(), "file listing truncated by the host");
        }

        let project = ProjectRecord {
            id: project_id,
            default_branch: repo.default_branch,
            url: repo.url,
            git_url: repo.clone_url,
            trees_url: repo.trees_url,
            user: repo.owner.login,
            name: repo.name,
        };
        Ok(Some(RemoteProject {
            project,
            files: tree.tree,
        }))
    }
}
