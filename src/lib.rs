//! # Agora Sync
//!
//! Keeps a searchable index of source-code projects in step with their
//! repositories on GitHub.
//!
//! For each project the engine resolves metadata and the recursive file
//! listing from the host, mirrors the working copy with git, extracts a
//! structural document for every compilable file through a long-lived
//! external parser worker, and reconciles the result against what the index
//! already holds so that only changed files cause writes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌─────────────┐
//! │  GitHub  │──▶│  Mirror  │──▶│  Extractor │──▶│  Reconcile  │
//! │ metadata │   │ git CLI  │   │  (parser   │   │  plan+apply │
//! │ + tree   │   │          │   │   worker)  │   │             │
//! └──────────┘   └──────────┘   └────────────┘   └──────┬──────┘
//!                                                       ▼
//!                                                ┌─────────────┐
//!                                                │ IndexStore  │
//!                                                │   SQLite    │
//!                                                └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`parser`] | Framed request/response channel to the parser worker |
//! | [`extract`] | Structural extraction and the per-file eligibility gate |
//! | [`reconcile`] | Create/update/delete planning against the indexed snapshot |
//! | [`sync`] | Per-project add/delete and batches |
//! | [`models`] | Projects, files and structural documents |
//! | [`store`] | Index storage trait, SQLite and in-memory backends |
//! | [`github`] | Host API client with rate-limit backoff |
//! | [`mirror`] | Working copies via git |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | `create_index` / `delete_index` |
//! | [`progress`] | Progress reporting on stderr |
//! | [`logging`] | Tracing subscriber setup |
//! | [`stats`] | Index statistics |

pub mod config;
pub mod db;
pub mod extract;
pub mod github;
pub mod logging;
pub mod migrate;
pub mod mirror;
pub mod models;
pub mod parser;
pub mod progress;
pub mod reconcile;
pub mod stats;
pub mod store;
pub mod sync;
