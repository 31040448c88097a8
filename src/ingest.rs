//! Line stream → transformer → batched upserts.
//!
//! Shared by the bulk loader and the delta synchronizer. Lines are read as
//! raw bytes so a line with invalid UTF-8 is a counted skip rather than a
//! failed read. Each full batch is committed before the next line is read;
//! an I/O error mid-stream leaves every earlier batch committed.
//!
//! Reads (and gzip inflation) are synchronous. On a multi-threaded runtime
//! they go through `block_in_place` so other tasks keep their worker.

use anyhow::Result;
use catalog_mirror_core::models::Record;
use catalog_mirror_core::transform::{transform_line, SkipReason};
use serde::Serialize;
use std::io::BufRead;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

use crate::error::CatalogError;
use crate::store::CatalogWriter;

/// Counters for one ingested stream.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub lines: u64,
    pub upserted: u64,
    pub skipped_decode: u64,
    pub skipped_missing_code: u64,
    pub skipped_missing_name: u64,
    pub batches: u64,
    /// Largest `last_modified_t` among transformed records.
    pub max_last_modified: Option<i64>,
}

impl IngestStats {
    pub fn skipped(&self) -> u64 {
        self.skipped_decode + self.skipped_missing_code + self.skipped_missing_name
    }

    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Decode => self.skipped_decode += 1,
            SkipReason::MissingCode => self.skipped_missing_code += 1,
            SkipReason::MissingName => self.skipped_missing_name += 1,
        }
    }

    fn record_transformed(&mut self, record: &Record) {
        self.max_last_modified = Some(
            self.max_last_modified
                .map_or(record.last_modified_t, |m| m.max(record.last_modified_t)),
        );
    }
}

/// Stream `reader` line by line into the store in batches of `batch_size`.
///
/// `source` names the stream in errors and logs. Blank lines are ignored
/// and not counted.
pub async fn ingest_lines<R: BufRead>(
    writer: &CatalogWriter,
    mut reader: R,
    batch_size: usize,
    source: &str,
) -> Result<IngestStats> {
    let batch_size = batch_size.max(1);
    let mut stats = IngestStats::default();
    let mut batch: Vec<Record> = Vec::with_capacity(batch_size);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = blocking_io(|| reader.read_until(b'\n', &mut line))
            .map_err(|e| CatalogError::PayloadDecode {
                file: source.to_string(),
                reason: e.to_string(),
            })?;
        if read == 0 {
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        stats.lines += 1;
        match transform_line(&line) {
            Ok(record) => {
                stats.record_transformed(&record);
                batch.push(record);
            }
            Err(reason) => stats.record_skip(reason),
        }

        if batch.len() >= batch_size {
            flush(writer, &mut batch, &mut stats, source).await?;
        }
    }

    flush(writer, &mut batch, &mut stats, source).await?;
    Ok(stats)
}

async fn flush(
    writer: &CatalogWriter,
    batch: &mut Vec<Record>,
    stats: &mut IngestStats,
    source: &str,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    stats.upserted += writer.upsert_batch(batch).await?;
    stats.batches += 1;
    debug!(
        source,
        batch = stats.batches,
        upserted = stats.upserted,
        skipped = stats.skipped(),
        "batch committed"
    );
    batch.clear();
    Ok(())
}

/// Run a synchronous read, handing the worker thread back to the runtime
/// when the runtime can spare it.
fn blocking_io<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}
