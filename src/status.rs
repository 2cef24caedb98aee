// System status display: row counts, database size, last relay time.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use crate::db::models::RelayStats;
use crate::db::{Backend, Database};

/// Display system status to the terminal.
pub async fn show(db: &dyn Database, database_url: &str) -> Result<()> {
    println!("{}", "=== timeline-relay status ===".bold());

    match Backend::from_url(database_url) {
        Backend::Sqlite(path) => {
            let file_size = std::fs::metadata(Path::new(&path))
                .map(|m| format_bytes(m.len()))
                .unwrap_or_else(|_| "unknown".to_string());
            println!("Database: {} ({})", path, file_size);
        }
        Backend::Postgres(_) => println!("Database: PostgreSQL"),
    }

    let stats = db.stats().await?;
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &RelayStats) {
    println!("Relayed items on record: {}", stats.relay_count.to_string().green());
    println!(
        "Suppressed authors: {}",
        stats.suppressed_count.to_string().yellow()
    );
    println!("Image fingerprints: {}", stats.fingerprint_count);
    match &stats.last_relay_at {
        Some(at) => println!("Last relay: {at}"),
        None => println!("Last relay: {}", "never".dimmed()),
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
