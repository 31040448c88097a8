//! Semantic index: per-product embeddings and nearest-neighbour retrieval.
//!
//! Vectors live in `product_vectors`, one row per product id, stored as
//! unit-normalized little-endian `f32` blobs together with the model name,
//! dimensionality, and a SHA-256 of the `search_text` they were computed
//! from.
//!
//! A product is *pending* when it has no vector, a vector from another
//! model or dimensionality, or a vector stamped no later than the product's
//! last write. Pending rows whose text hash still matches are re-stamped
//! without calling the embedder.

use anyhow::Result;
use catalog_mirror_core::embedding::{blob_to_vec, l2_distance, l2_normalize, vec_to_blob, Embedder, NearestK};
use futures::TryStreamExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::store::CatalogWriter;

/// Stored vectors for one model. Binds: model, dims, complete-only flag.
pub const VECTOR_SCAN_SQL: &str = r#"
    SELECT v.id, v.embedding
    FROM product_vectors v
    JOIN products p ON p.id = v.id
    WHERE v.model = ?1 AND v.dims = ?2
      AND (?3 = 0 OR p.complete_macros = 1)
"#;

const PENDING_PAGE_SQL: &str = r#"
    SELECT p.id, p.search_text, v.text_hash, v.model, v.dims
    FROM products p
    LEFT JOIN product_vectors v ON v.id = p.id
    WHERE p.id > ?1
      AND (v.id IS NULL OR v.model != ?2 OR v.dims != ?3 OR v.embedded_at <= p.updated_at)
    ORDER BY p.id
    LIMIT ?4
"#;

const UPSERT_VECTOR: &str = r#"
    INSERT INTO product_vectors (id, model, dims, text_hash, embedding, embedded_at)
    VALUES (?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        model = excluded.model,
        dims = excluded.dims,
        text_hash = excluded.text_hash,
        embedding = excluded.embedding,
        embedded_at = excluded.embedded_at
"#;

#[derive(Debug, Clone)]
pub struct EmbedOptions {
    /// Texts per embedder call (and per write transaction).
    pub batch_size: usize,
    /// Rows per keyset page.
    pub page_size: usize,
    /// Stop after this many pending rows.
    pub limit: Option<usize>,
    /// Count pending rows without embedding or writing.
    pub dry_run: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedReport {
    pub pending: u64,
    pub embedded: u64,
    /// Pending only by timestamp; text unchanged, vector re-stamped.
    pub unchanged: u64,
    pub failed: u64,
}

struct PendingRow {
    id: String,
    text: String,
    text_hash: String,
}

/// Embed every pending product.
pub async fn embed_pending(
    writer: &CatalogWriter,
    embedder: &dyn Embedder,
    opts: &EmbedOptions,
) -> Result<EmbedReport> {
    let pool = writer.pool();
    let model = embedder.model_name().to_string();
    let dims = embedder.dims();
    let page_size = opts.page_size.max(1);
    let batch_size = opts.batch_size.max(1);
    let mut remaining = opts.limit.unwrap_or(usize::MAX);

    let mut report = EmbedReport::default();
    let mut cursor = String::new();

    while remaining > 0 {
        let rows = sqlx::query(PENDING_PAGE_SQL)
            .bind(&cursor)
            .bind(&model)
            .bind(dims as i64)
            .bind(page_size.min(remaining) as i64)
            .fetch_all(pool)
            .await?;
        if rows.is_empty() {
            break;
        }
        remaining -= rows.len();
        report.pending += rows.len() as u64;

        let mut to_embed = Vec::new();
        let mut to_restamp = Vec::new();
        for row in &rows {
            let id: String = row.try_get("id")?;
            let text: String = row.try_get("search_text")?;
            let text_hash = hash_text(&text);
            let stored_hash: Option<String> = row.try_get("text_hash")?;
            let stored_model: Option<String> = row.try_get("model")?;
            let stored_dims: Option<i64> = row.try_get("dims")?;

            let same_vector = stored_hash.as_deref() == Some(text_hash.as_str())
                && stored_model.as_deref() == Some(model.as_str())
                && stored_dims == Some(dims as i64);
            if same_vector {
                to_restamp.push(id.clone());
            } else {
                to_embed.push(PendingRow { id: id.clone(), text, text_hash });
            }
            cursor = id;
        }

        if opts.dry_run {
            continue;
        }

        report.unchanged += restamp(pool, &to_restamp).await?;

        for batch in to_embed.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            match embedder.embed(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    let (stored, rejected) = store_batch(pool, &model, dims, batch, vectors).await?;
                    report.embedded += stored;
                    report.failed += rejected;
                }
                Ok(vectors) => {
                    warn!(
                        expected = batch.len(),
                        got = vectors.len(),
                        "embedder returned wrong number of vectors"
                    );
                    report.failed += batch.len() as u64;
                }
                Err(e) => {
                    warn!(error = %e, size = batch.len(), "embedding batch failed");
                    report.failed += batch.len() as u64;
                }
            }
        }

        debug!(
            cursor = %cursor,
            embedded = report.embedded,
            failed = report.failed,
            "embedding page done"
        );
    }

    info!(
        model = %model,
        pending = report.pending,
        embedded = report.embedded,
        unchanged = report.unchanged,
        failed = report.failed,
        dry_run = opts.dry_run,
        "embed pending finished"
    );
    Ok(report)
}

/// Delete every stored vector, then embed all products.
pub async fn embed_rebuild(
    writer: &CatalogWriter,
    embedder: &dyn Embedder,
    opts: &EmbedOptions,
) -> Result<EmbedReport> {
    let cleared = sqlx::query("DELETE FROM product_vectors")
        .execute(writer.pool())
        .await?
        .rows_affected();
    info!(cleared, "cleared stored embeddings");
    embed_pending(writer, embedder, opts).await
}

/// The `k` stored vectors closest to `query` (already unit-normalized),
/// as `(id, distance)` ordered by ascending distance. With
/// `complete_only`, products without complete macros are skipped before
/// the cut.
///
/// Streams the vector table so memory stays at `k` entries.
pub async fn nearest(
    pool: &SqlitePool,
    model: &str,
    query: &[f32],
    k: usize,
    complete_only: bool,
) -> Result<Vec<(String, f32)>> {
    let mut best = NearestK::new(k);
    let mut rows = sqlx::query(VECTOR_SCAN_SQL)
        .bind(model)
        .bind(query.len() as i64)
        .bind(complete_only)
        .fetch(pool);

    while let Some(row) = rows.try_next().await? {
        let id: String = row.try_get("id")?;
        let blob: Vec<u8> = row.try_get("embedding")?;
        best.push(&id, l2_distance(query, &blob_to_vec(&blob)));
    }

    Ok(best.into_sorted())
}

async fn restamp(pool: &SqlitePool, ids: &[String]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    for id in ids {
        sqlx::query("UPDATE product_vectors SET embedded_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(ids.len() as u64)
}

/// Normalize and write one batch in a single transaction. Vectors with the
/// wrong dimensionality or zero norm are rejected. Returns
/// `(stored, rejected)`.
async fn store_batch(
    pool: &SqlitePool,
    model: &str,
    dims: usize,
    batch: &[PendingRow],
    vectors: Vec<Vec<f32>>,
) -> Result<(u64, u64)> {
    let now = chrono::Utc::now().timestamp();
    let mut stored = 0u64;
    let mut rejected = 0u64;
    let mut tx = pool.begin().await?;

    for (item, mut vec) in batch.iter().zip(vectors) {
        if vec.len() != dims || !l2_normalize(&mut vec) {
            warn!(id = %item.id, len = vec.len(), "rejected embedding");
            rejected += 1;
            continue;
        }
        sqlx::query(UPSERT_VECTOR)
            .bind(&item.id)
            .bind(model)
            .bind(dims as i64)
            .bind(&item.text_hash)
            .bind(vec_to_blob(&vec))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        stored += 1;
    }

    tx.commit().await?;
    Ok((stored, rejected))
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
