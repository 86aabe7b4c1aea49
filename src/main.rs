//! # Agora CLI (`agora`)
//!
//! The `agora` binary keeps a searchable index of source-code projects in
//! step with their GitHub repositories.
//!
//! ## Usage
//!
//! ```bash
//! agora --config ./config/agora.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `agora create_index` | Create the index tables |
//! | `agora delete_index` | Drop the index tables and everything in them |
//! | `agora add_project <address>` | Import or update one project |
//! | `agora add_projects <file>` | Import or update every project listed in a file |
//! | `agora delete_project <address>` | Remove one project and its files |
//! | `agora delete_projects <file>` | Remove every project listed in a file |
//! | `agora stats` | Summarize what is indexed |
//! | `agora show_file <id>` | Print one indexed file record as JSON |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use agora_sync::config::{self, Config};
use agora_sync::extract::Extractor;
use agora_sync::github::GithubClient;
use agora_sync::mirror::GitMirror;
use agora_sync::parser::ParserChannel;
use agora_sync::progress::ProgressMode;
use agora_sync::store::sqlite::SqliteIndex;
use agora_sync::store::IndexStore;
use agora_sync::sync::{parse_address_list, BatchReport, ProjectSync, SyncError, SyncOutcome};
use agora_sync::{db, logging, migrate, stats};

/// Agora: keeps a structural source-code index in step with GitHub.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/agora.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "agora", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/agora.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to dots on a terminal, off otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// Create the index tables. Idempotent.
    CreateIndex,

    /// Drop the index tables and everything in them.
    DeleteIndex,

    /// Import a project, or bring an indexed one up to date.
    ///
    /// Accepts an API URL, a web URL, or `owner/name`.
    AddProject { address: String },

    /// `add_project` for every address in a file (one per line, `#` comments allowed).
    AddProjects { file: PathBuf },

    /// Remove a project and all of its files from the index.
    DeleteProject { address: String },

    /// `delete_project` for every address in a file.
    DeleteProjects { file: PathBuf },

    /// Summarize what is indexed.
    Stats,

    /// Print one indexed file record (`owner/name/path`) as JSON.
    ShowFile { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging()?;

    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::CreateIndex => {
            let pool = db::connect(&cfg.index.path).await?;
            migrate::create_index(&pool).await?;
            pool.close().await;
            println!("Index created at {}.", cfg.index.path.display());
        }
        Commands::DeleteIndex => {
            let pool = db::connect(&cfg.index.path).await?;
            migrate::delete_index(&pool).await?;
            pool.close().await;
            println!("Index deleted.");
        }
        Commands::AddProject { address } => {
            run_add(&cfg, progress, vec![address]).await?;
        }
        Commands::AddProjects { file } => {
            run_add(&cfg, progress, read_addresses(&file)?).await?;
        }
        Commands::DeleteProject { address } => {
            run_delete(&cfg, progress, vec![address]).await?;
        }
        Commands::DeleteProjects { file } => {
            run_delete(&cfg, progress, read_addresses(&file)?).await?;
        }
        Commands::Stats => {
            let index = SqliteIndex::open(&cfg.index.path).await?;
            stats::run_stats(&index, &cfg.index.path).await?;
            index.close().await;
        }
        Commands::ShowFile { id } => {
            let index = SqliteIndex::open(&cfg.index.path).await?;
            let file = index.get_file(&id).await?;
            index.close().await;
            match file {
                Some(file) => println!("{}", serde_json::to_string_pretty(&file)?),
                None => bail!("file {} is not indexed", id),
            }
        }
    }

    Ok(())
}

fn read_addresses(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read address list: {}", path.display()))?;
    Ok(parse_address_list(&text))
}

async fn build_sync(
    cfg: &Config,
    progress: ProgressMode,
    channel: ParserChannel,
) -> Result<(ProjectSync, Arc<SqliteIndex>)> {
    let index = Arc::new(SqliteIndex::open(&cfg.index.path).await?);
    let sync = ProjectSync::new(
        Box::new(GithubClient::new(&cfg.github)?),
        Box::new(GitMirror::from_config(&cfg.mirror)),
        index.clone(),
        Extractor::new(Box::new(channel)),
        cfg.extraction.clone(),
        cfg.mirror.source_dir.clone(),
        progress.reporter(),
    );
    Ok((sync, index))
}

fn print_status(address: &str, result: &Result<SyncOutcome, SyncError>) {
    match result {
        Ok(outcome) => println!("{}: {}", address, outcome),
        Err(err) => println!("{}: FAILED ({}) {}", address, err.class(), err),
    }
}

fn finish(verb: &str, report: &BatchReport) -> Result<()> {
    println!(
        "Done: {} {}, {} failed.",
        report.succeeded.len(),
        verb,
        report.failed.len()
    );
    if let Some(reason) = &report.aborted {
        bail!("batch aborted: {}", reason);
    }
    if !report.is_success() {
        bail!("{} project(s) failed", report.failed.len());
    }
    Ok(())
}

async fn run_add(cfg: &Config, progress: ProgressMode, addresses: Vec<String>) -> Result<()> {
    let mut channel = ParserChannel::from_config(&cfg.parser);
    channel
        .start()
        .with_context(|| format!("Failed to start parser worker `{}`", cfg.parser.command))?;

    let (mut sync, index) = build_sync(cfg, progress, channel).await?;
    let report = sync.add_projects(&addresses, print_status).await;
    drop(sync);
    index.close().await;
    finish("synced", &report)
}

async fn run_delete(cfg: &Config, progress: ProgressMode, addresses: Vec<String>) -> Result<()> {
    // deletes never reach the parser, so the worker is not launched
    let channel = ParserChannel::from_config(&cfg.parser);
    let (mut sync, index) = build_sync(cfg, progress, channel).await?;
    let report = sync.delete_projects(&addresses, print_status).await;
    drop(sync);
    index.close().await;
    finish("deleted", &report)
}
