//! Bulk loader: destructive full rebuild from a complete dump.
//!
//! # Phases
//!
//! 1. Drop and recreate the schema (FTS triggers left off).
//! 2. Stream the dump through the transformer, committing batches.
//! 3. Rebuild the lexical index wholesale, reinstall triggers, optimize,
//!    and vacuum.
//! 4. Seed the delta watermark from the newest `last_modified_t` seen and
//!    record the import time.
//!
//! A read failure in phase 2 still runs phase 3, so the committed prefix
//! of the dump is searchable, and then surfaces the error. The watermark is
//! not seeded for a partial load. If the process dies before phase 3, the
//! next [`CatalogWriter::open`] finds the triggers missing and repopulates
//! the index.

use anyhow::Result;
use serde::Serialize;
use std::io::BufRead;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::Config;
use crate::fetch::open_payload;
use crate::fts;
use crate::ingest::{ingest_lines, IngestStats};
use crate::store::{CatalogWriter, LAST_FULL_IMPORT_KEY};

#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub stats: IngestStats,
    pub indexed: u64,
    /// Watermark seeded after the load, if any record carried a timestamp.
    pub watermark: Option<i64>,
    pub elapsed_secs: f64,
}

/// `catmirror import <dump>`.
pub async fn run_import(config: &Config, dump: &Path, batch_size: Option<usize>) -> Result<()> {
    let batch_size = batch_size.unwrap_or(config.import.batch_size);
    let reader = open_payload(dump)?;

    let writer = CatalogWriter::open(config).await?;
    let result = bulk_load(&writer, reader, batch_size, &dump.display().to_string()).await;
    writer.close().await;
    let report = result?;

    println!("import {}", dump.display());
    println!("  lines read: {}", report.stats.lines);
    println!("  upserted: {}", report.stats.upserted);
    println!("  skipped (undecodable): {}", report.stats.skipped_decode);
    println!("  skipped (no code): {}", report.stats.skipped_missing_code);
    println!("  skipped (no name): {}", report.stats.skipped_missing_name);
    println!("  batches: {}", report.stats.batches);
    println!("  indexed: {}", report.indexed);
    match report.watermark {
        Some(w) => println!("  watermark: {}", w),
        None => println!("  watermark: (unset)"),
    }
    println!("  elapsed: {:.1}s", report.elapsed_secs);
    println!("ok");

    Ok(())
}

/// Replace the store contents with the records in `reader`.
pub async fn bulk_load<R: BufRead>(
    writer: &CatalogWriter,
    reader: R,
    batch_size: usize,
    source: &str,
) -> Result<BulkReport> {
    let started = Instant::now();

    info!(source, "reinitializing store");
    writer.reinitialize().await?;

    info!(source, batch_size, "loading records");
    let loaded = ingest_lines(writer, reader, batch_size, source).await;

    info!("rebuilding search index");
    let indexed = fts::rebuild_index(writer).await?;

    let stats = match loaded {
        Ok(stats) => stats,
        Err(e) => {
            warn!(source, indexed, "load aborted, committed batches kept");
            return Err(e);
        }
    };

    if let Some(max) = stats.max_last_modified {
        writer.set_watermark(max).await?;
    }
    writer
        .set_metadata(
            LAST_FULL_IMPORT_KEY,
            &chrono::Utc::now().timestamp().to_string(),
        )
        .await?;

    let report = BulkReport {
        indexed,
        watermark: stats.max_last_modified,
        elapsed_secs: started.elapsed().as_secs_f64(),
        stats,
    };
    info!(
        upserted = report.stats.upserted,
        skipped = report.stats.skipped(),
        indexed = report.indexed,
        "bulk load complete"
    );
    Ok(report)
}
