//! Index statistics.
//!
//! Summarizes what is indexed: project and file counts, how many files carry
//! structure, and a per-project breakdown. Used by `agora stats` to confirm
//! that imports and updates land where expected.

use std::path::Path;

use anyhow::Result;

use crate::store::{IndexStats, IndexStore};

/// Run the stats command: query the index and print a summary.
pub async fn run_stats(store: &dyn IndexStore, db_path: &Path) -> Result<()> {
    let stats = store.stats().await?;
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);
    print!("{}", render(&stats, db_path, db_size));
    Ok(())
}

fn render(stats: &IndexStats, db_path: &Path, db_size: u64) -> String {
    let mut out = String::new();
    out.push_str("Agora Index Stats\n");
    out.push_str("=================\n\n");
    out.push_str(&format!("  Index:       {}\n", db_path.display()));
    out.push_str(&format!("  Size:        {}\n\n", format_bytes(db_size)));
    out.push_str(&format!("  Projects:    {}\n", stats.projects));
    out.push_str(&format!("  Files:       {}\n", stats.files));
    out.push_str(&format!(
        "  Structured:  {} / {} ({}%)\n",
        stats.structured_files,
        stats.files,
        if stats.files > 0 {
            (stats.structured_files * 100) / stats.files
        } else {
            0
        }
    ));

    if !stats.per_project.is_empty() {
        out.push_str("\n  By project:\n");
        out.push_str(&format!("  {:<48} {:>8}\n", "PROJECT", "FILES"));
        out.push_str(&format!("  {}\n", "-".repeat(57)));
        for (project, files) in &stats.per_project {
            out.push_str(&format!("  {:<48} {:>8}\n", project, files));
        }
    }
    out.push('\n');
    out
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
