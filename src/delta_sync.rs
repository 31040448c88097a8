//! Delta synchronizer: watermark-driven incremental updates.
//!
//! # Protocol
//!
//! ```text
//! manifest ──parse──▶ descriptors ──end > W, sort by end──▶ plan
//!
//! for each delta in plan (strictly in order):
//!     fetch into a temp file
//!     stream lines → transformer → batched upserts (one tx per batch)
//!     W := delta.end                      (committed before the next file)
//!     temp file removed                   (on every path)
//! ```
//!
//! The watermark `W` is the end timestamp of the last delta that was
//! applied in full. A failure anywhere inside a file stops the run with
//! `W` still at the previous file's end, so the next run reapplies the
//! interrupted file from its first line. Upserts are full-record replaces,
//! which makes that replay harmless.
//!
//! Embeddings are not refreshed here; `embed pending` picks up rows whose
//! `updated_at` moved past their vector's `embedded_at`.

use anyhow::{Context, Result};
use catalog_mirror_core::delta::{plan_deltas, DeltaDescriptor};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::fetch::{create_delta_source, open_payload, DeltaSource};
use crate::ingest::{ingest_lines, IngestStats};
use crate::store::{CatalogWriter, LAST_DELTA_SYNC_KEY, LAST_FULL_IMPORT_KEY};

#[derive(Debug, Clone, Serialize)]
pub struct DeltaFileReport {
    pub file_name: String,
    pub end: i64,
    pub stats: IngestStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaSyncReport {
    pub watermark_before: Option<i64>,
    pub planned: usize,
    pub applied: Vec<DeltaFileReport>,
    pub watermark_after: Option<i64>,
}

impl DeltaSyncReport {
    pub fn upserted(&self) -> u64 {
        self.applied.iter().map(|f| f.stats.upserted).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.applied.iter().map(|f| f.stats.skipped()).sum()
    }
}

/// Fetch the manifest and compute which deltas would apply, in order.
pub async fn plan(
    writer: &CatalogWriter,
    source: &dyn DeltaSource,
) -> Result<(Option<i64>, Vec<DeltaDescriptor>)> {
    let watermark = writer.watermark().await?;
    let manifest = source.manifest().await?;
    Ok((watermark, plan_deltas(&manifest, watermark)))
}

/// Apply every pending delta from `source`, advancing the watermark after
/// each file.
pub async fn sync_deltas(
    writer: &CatalogWriter,
    source: &dyn DeltaSource,
    batch_size: usize,
) -> Result<DeltaSyncReport> {
    let (watermark_before, deltas) = plan(writer, source).await?;
    info!(
        source = %source.describe(),
        watermark = ?watermark_before,
        pending = deltas.len(),
        "delta sync starting"
    );

    let mut applied = Vec::with_capacity(deltas.len());
    for delta in &deltas {
        let stats = apply_delta(writer, source, delta, batch_size)
            .await
            .with_context(|| format!("Delta {} failed", delta.file_name))?;

        writer.advance_watermark(delta.end).await?;
        info!(
            file = %delta.file_name,
            upserted = stats.upserted,
            skipped = stats.skipped(),
            watermark = delta.end,
            "delta applied"
        );

        applied.push(DeltaFileReport {
            file_name: delta.file_name.clone(),
            end: delta.end,
            stats,
        });
    }

    Ok(DeltaSyncReport {
        watermark_before,
        planned: deltas.len(),
        applied,
        watermark_after: writer.watermark().await?,
    })
}

async fn apply_delta(
    writer: &CatalogWriter,
    source: &dyn DeltaSource,
    delta: &DeltaDescriptor,
    batch_size: usize,
) -> Result<IngestStats> {
    // Removed when dropped, whichever way this function exits.
    let temp = tempfile::Builder::new()
        .prefix("catmirror-delta-")
        .tempfile()
        .context("Failed to create temp file for delta")?;

    source.fetch(&delta.file_name, temp.path()).await?;
    let reader = open_payload(temp.path())?;
    let stats = ingest_lines(writer, reader, batch_size, &delta.file_name).await;
    if stats.is_err() {
        warn!(file = %delta.file_name, "delta aborted; watermark not advanced");
    }
    stats
}

/// `catmirror sync [--dry-run]`.
pub async fn run_sync(config: &Config, dry_run: bool) -> Result<()> {
    let source = create_delta_source(&config.delta)?;
    let writer = CatalogWriter::open(config).await?;

    if dry_run {
        let result = plan(&writer, source.as_ref()).await;
        writer.close().await;
        let (watermark, deltas) = result?;

        println!("sync (dry-run)");
        println!("  source: {}", source.describe());
        println!("  watermark: {}", display_watermark(watermark));
        println!("  deltas to apply: {}", deltas.len());
        for d in &deltas {
            println!("    {} (end {})", d.file_name, d.end);
        }
        return Ok(());
    }

    let result = sync_deltas(&writer, source.as_ref(), config.delta.batch_size).await;
    writer.close().await;
    let report = result?;

    println!("sync");
    println!("  source: {}", source.describe());
    println!("  watermark before: {}", display_watermark(report.watermark_before));
    println!("  deltas applied: {}", report.applied.len());
    for f in &report.applied {
        println!(
            "    {}: upserted {}, skipped {}",
            f.file_name,
            f.stats.upserted,
            f.stats.skipped()
        );
    }
    println!("  upserted: {}", report.upserted());
    println!("  skipped: {}", report.skipped());
    println!("  watermark after: {}", display_watermark(report.watermark_after));
    println!("ok");
    Ok(())
}

/// `catmirror watermark show`.
pub async fn run_watermark_show(config: &Config) -> Result<()> {
    let writer = CatalogWriter::open(config).await?;
    let watermark = writer.watermark().await;
    let last_import = writer.get_metadata(LAST_FULL_IMPORT_KEY).await;
    let last_sync = writer.get_metadata(LAST_DELTA_SYNC_KEY).await;
    writer.close().await;

    println!("watermark: {}", display_watermark(watermark?));
    println!("last full import: {}", display_epoch(last_import?));
    println!("last delta sync: {}", display_epoch(last_sync?));
    Ok(())
}

/// `catmirror watermark set <epoch>`.
pub async fn run_watermark_set(config: &Config, value: i64) -> Result<()> {
    if value < 0 {
        anyhow::bail!("watermark must be a non-negative epoch-seconds value");
    }
    let writer = CatalogWriter::open(config).await?;
    let before = writer.watermark().await;
    let result = writer.set_watermark(value).await;
    writer.close().await;
    result?;

    println!("watermark: {} -> {}", display_watermark(before?), value);
    Ok(())
}

fn display_watermark(watermark: Option<i64>) -> String {
    match watermark {
        Some(w) => match chrono::DateTime::from_timestamp(w, 0) {
            Some(dt) => format!("{} ({})", w, dt.format("%Y-%m-%dT%H:%M:%SZ")),
            None => w.to_string(),
        },
        None => "(unset)".to_string(),
    }
}

fn display_epoch(raw: Option<String>) -> String {
    raw.and_then(|s| s.parse::<i64>().ok())
        .map(|ts| display_watermark(Some(ts)))
        .unwrap_or_else(|| "never".to_string())
}
