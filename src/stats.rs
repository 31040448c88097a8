//! Store statistics and sync overview.
//!
//! Summarizes what the replica holds: product counts, macro coverage,
//! embedding coverage, and when the last full import and delta sync ran.
//! Opens the store read-only, so it fails on a store that was never built.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::store::{LAST_DELTA_SYNC_KEY, LAST_FULL_IMPORT_KEY, WATERMARK_KEY};

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub products: i64,
    pub complete: i64,
    pub embedded: i64,
    pub watermark: Option<i64>,
    pub last_full_import: Option<i64>,
    pub last_delta_sync: Option<i64>,
    pub db_size: u64,
}

pub async fn collect_stats(config: &Config) -> Result<StoreStats> {
    let pool = db::connect_reader(config, &[]).await?;
    let result = query_stats(&pool).await;
    pool.close().await;

    let mut stats = result?;
    stats.db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    Ok(stats)
}

async fn query_stats(pool: &SqlitePool) -> Result<StoreStats> {
    let products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(pool)
        .await?;
    let complete: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE complete_macros = 1")
            .fetch_one(pool)
            .await?;
    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_vectors")
        .fetch_one(pool)
        .await?;

    Ok(StoreStats {
        products,
        complete,
        embedded,
        watermark: metadata_epoch(pool, WATERMARK_KEY).await?,
        last_full_import: metadata_epoch(pool, LAST_FULL_IMPORT_KEY).await?,
        last_delta_sync: metadata_epoch(pool, LAST_DELTA_SYNC_KEY).await?,
        db_size: 0,
    })
}

async fn metadata_epoch(pool: &SqlitePool, key: &str) -> Result<Option<i64>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value.and_then(|v| v.parse().ok()))
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let s = collect_stats(config).await?;

    println!("Catalog Mirror — Store Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(s.db_size));
    println!();
    println!("  Products:    {}", s.products);
    println!("  Complete:    {} ({}%)", s.complete, percent(s.complete, s.products));
    println!(
        "  Embedded:    {} / {} ({}%)",
        s.embedded,
        s.products,
        percent(s.embedded, s.products)
    );
    println!();
    println!("  Watermark:        {}", format_ts(s.watermark, "(unset)"));
    println!("  Last full import: {}", format_ts(s.last_full_import, "never"));
    println!("  Last delta sync:  {}", format_ts(s.last_delta_sync, "never"));
    println!();
    Ok(())
}

fn percent(part: i64, total: i64) -> i64 {
    if total > 0 {
        (part * 100) / total
    } else {
        0
    }
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

fn format_ts(ts: Option<i64>, absent: &str) -> String {
    match ts {
        Some(ts) => chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| ts.to_string()),
        None => absent.to_string(),
    }
}
