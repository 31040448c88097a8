//! Lexical index maintenance and BM25 retrieval.
//!
//! `products_fts` is an FTS5 external-content table over
//! `products.search_text` (see [`crate::schema`]). Retrieval ranks with
//! FTS5's built-in `bm25()`, where lower is better; callers that need
//! "higher is better" negate it.

use anyhow::Result;
use catalog_mirror_core::models::SearchHit;
use catalog_mirror_core::query::build_match_query;
use catalog_mirror_core::search::Candidate;
use sqlx::{Row, SqlitePool};
use std::time::Instant;
use tracing::info;

use crate::schema;
use crate::store::{record_from_row, CatalogWriter};

/// Ranked full rows. Binds: match expression, complete-only flag, limit.
pub const KEYWORD_SEARCH_SQL: &str = "SELECT p.id, p.name, p.brands, p.categories, p.countries, \
    p.energy_kcal, p.fat, p.saturated_fat, p.carbohydrates, p.sugars, p.proteins, p.salt, p.fiber, \
    p.nutriscore_grade, p.nova_group, p.ecoscore_grade, p.completeness, p.complete_macros, \
    p.last_modified_t, p.raw_data, p.search_text, p.created_at, p.updated_at, \
    bm25(products_fts) AS bm25_score \
    FROM products_fts \
    JOIN products p ON p.pk = products_fts.rowid \
    WHERE products_fts MATCH ?1 AND (?2 = 0 OR p.complete_macros = 1) \
    ORDER BY bm25_score, p.id \
    LIMIT ?3";

/// Ranked ids only, for hybrid candidate generation. Same binds.
pub const KEYWORD_CANDIDATES_SQL: &str = "SELECT p.id, bm25(products_fts) AS bm25_score \
    FROM products_fts \
    JOIN products p ON p.pk = products_fts.rowid \
    WHERE products_fts MATCH ?1 AND (?2 = 0 OR p.complete_macros = 1) \
    ORDER BY bm25_score, p.id \
    LIMIT ?3";

/// Keyword search returning full records, best match first.
///
/// `limit` is used as given; clamping happens in the query engine. Blank or
/// punctuation-only terms return no hits without touching the index.
pub async fn keyword_search(
    pool: &SqlitePool,
    term: &str,
    complete_only: bool,
    limit: i64,
) -> Result<Vec<SearchHit>> {
    let Some(match_expr) = build_match_query(term) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(KEYWORD_SEARCH_SQL)
        .bind(&match_expr)
        .bind(complete_only)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let rank: f64 = row.try_get("bm25_score")?;
            Ok(SearchHit {
                score: -rank,
                record: record_from_row(row)?,
            })
        })
        .collect()
}

/// Keyword candidates as `(id, -bm25)` for hybrid merging.
pub async fn keyword_candidates(
    pool: &SqlitePool,
    term: &str,
    complete_only: bool,
    candidate_k: i64,
) -> Result<Vec<Candidate>> {
    let Some(match_expr) = build_match_query(term) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(KEYWORD_CANDIDATES_SQL)
        .bind(&match_expr)
        .bind(complete_only)
        .bind(candidate_k)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let rank: f64 = row.try_get("bm25_score")?;
            Ok(Candidate::new(row.try_get::<String, _>("id")?, -rank))
        })
        .collect()
}

/// Rebuild `products_fts` from scratch with the writer's tokenizer.
///
/// Drops triggers and the index, recreates the index, repopulates it from
/// `products` in one pass, and reinstalls the triggers, all in a single
/// transaction. Segment merging and `VACUUM` follow the commit. Returns the
/// number of indexed rows.
pub async fn rebuild_index(writer: &CatalogWriter) -> Result<u64> {
    let pool = writer.pool();
    let started = Instant::now();

    let mut tx = pool.begin().await?;
    schema::rebuild_fts(&mut tx, writer.tokenizer()).await?;
    tx.commit().await?;
    info!(tokenizer = writer.tokenizer(), "search index repopulated");

    sqlx::query("INSERT INTO products_fts(products_fts) VALUES ('optimize')")
        .execute(pool)
        .await?;
    sqlx::query("VACUUM").execute(pool).await?;

    let indexed = writer.count_products().await? as u64;
    info!(
        indexed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "search index rebuilt"
    );
    Ok(indexed)
}

/// `catmirror index rebuild`.
pub async fn run_rebuild(config: &crate::config::Config) -> Result<()> {
    let writer = CatalogWriter::open(config).await?;
    let result = rebuild_index(&writer).await;
    writer.close().await;
    let indexed = result?;

    println!("index rebuild");
    println!("  tokenizer: {}", config.index.tokenizer.trim());
    println!("  indexed: {}", indexed);
    println!("ok");
    Ok(())
}
