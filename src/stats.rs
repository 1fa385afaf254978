//! Database and cache overview.
//!
//! Used by `patents stats`: how many patents and child rows are stored,
//! how many downloaded blobs are cached and processed, and how much disk
//! both take. WAL mode lets it run while an ingestion is in progress.

use anyhow::{Context, Result};
use sqlx::Row;

use crate::cache::{CacheSummary, ContentCache};
use crate::config::Config;
use crate::db;
use crate::store::PatentStore;

/// Last catalog sync per dataset.
struct DatasetRow {
    id: String,
    title: Option<String>,
    processed_at: String,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    if !config.db.path.exists() {
        anyhow::bail!(
            "Database {} does not exist. Run `patents init` first.",
            config.db.path.display()
        );
    }

    let pool = db::connect(config)
        .await
        .with_context(|| format!("Failed to open {}", config.db.path.display()))?;

    let store = PatentStore::from_pool(pool.clone(), config.ingest.batch_size);
    let counts = store.table_counts().await?;
    let cache = ContentCache::new(pool.clone(), &config.cache.dir)?;
    let CacheSummary {
        cached_files,
        processed_files,
        total_bytes,
    } = cache.summary().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let datasets: Vec<DatasetRow> =
        sqlx::query("SELECT id, title, processed_at FROM datasets ORDER BY processed_at DESC")
            .fetch_all(&pool)
            .await?
            .iter()
            .map(|row| DatasetRow {
                id: row.get("id"),
                title: row.get("title"),
                processed_at: row.get("processed_at"),
            })
            .collect();

    println!("Patent Ingest — Database Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    for (table, count) in &counts {
        println!("  {:<28} {:>10}", table, count);
    }
    println!();
    println!("  Cache:       {}", config.cache.dir.display());
    println!(
        "  Files:       {} cached, {} processed",
        cached_files, processed_files
    );
    println!("  Cache size:  {}", format_bytes(total_bytes.max(0) as u64));

    if !datasets.is_empty() {
        println!();
        println!("  Datasets:");
        println!("  {:<38} {:<26} {}", "ID", "LAST PROCESSED", "TITLE");
        println!("  {}", "-".repeat(76));
        for d in &datasets {
            println!(
                "  {:<38} {:<26} {}",
                d.id,
                d.processed_at,
                d.title.as_deref().unwrap_or("")
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
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
