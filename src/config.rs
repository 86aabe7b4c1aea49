use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::parser::DEFAULT_RECYCLE_AFTER;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub github: GithubConfig,
    pub mirror: MirrorConfig,
    pub parser: ParserConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Core-API requests left below which the client waits for the reset.
    #[serde(default = "default_min_remaining")]
    pub min_remaining: u64,
    #[serde(default = "default_search_min_remaining")]
    pub search_min_remaining: u64,
    /// Extra seconds slept past the advertised reset time.
    #[serde(default = "default_reset_grace_secs")]
    pub reset_grace_secs: u64,
    #[serde(default = "default_search_reset_grace_secs")]
    pub search_reset_grace_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            username: None,
            token: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            min_remaining: default_min_remaining(),
            search_min_remaining: default_search_min_remaining(),
            reset_grace_secs: default_reset_grace_secs(),
            search_reset_grace_secs: default_search_reset_grace_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_min_remaining() -> u64 {
    100
}
fn default_search_min_remaining() -> u64 {
    5
}
fn default_reset_grace_secs() -> u64 {
    60
}
fn default_search_reset_grace_secs() -> u64 {
    20
}

impl GithubConfig {
    /// Token from the config file, falling back to `GITHUB_TOKEN`.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MirrorConfig {
    /// Root under which working copies live as `{owner}/{name}`.
    pub source_dir: PathBuf,
    #[serde(default = "default_git_command")]
    pub git_command: String,
}

fn default_git_command() -> String {
    "git".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParserConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_recycle_after")]
    pub recycle_after: u32,
}

fn default_recycle_after() -> u32 {
    DEFAULT_RECYCLE_AFTER
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Longer file names are indexed without structure.
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            max_name_len: default_max_name_len(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["java".to_string()]
}
fn default_max_name_len() -> usize {
    125
}

impl ExtractionConfig {
    pub fn is_source_extension(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.parser.command.trim().is_empty() {
        anyhow::bail!("parser.command must not be empty");
    }
    if config.parser.recycle_after == 0 {
        anyhow::bail!("parser.recycle_after must be > 0");
    }

    if config.extraction.max_name_len == 0 {
        anyhow::bail!("extraction.max_name_len must be > 0");
    }
    if config.extraction.extensions.is_empty() {
        anyhow::bail!("extraction.extensions must list at least one extension");
    }

    if !config.github.api_url.starts_with("http://") && !config.github.api_url.starts_with("https://")
    {
        anyhow::bail!(
            "github.api_url must be an http(s) URL, got '{}'",
            config.github.api_url
        );
    }

    Ok(config)
}
