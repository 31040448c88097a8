//! Query engine: the read-only surface over a built store.
//!
//! [`QueryEngine`] owns a read-only pool. It never writes, never creates
//! tables, and never rebuilds anything; opening it against a missing or
//! half-built store fails immediately with
//! [`CatalogError::StorageUnavailable`](crate::error::CatalogError).
//!
//! # Search modes
//!
//! | Mode | Ranking | Fallback |
//! |------|---------|----------|
//! | `keyword` | BM25 over `products_fts` | none |
//! | `semantic` | L2 distance between unit vectors | empty result |
//! | `hybrid` | `(1-α)·keyword + α·semantic`, min-max normalized | keyword only |
//!
//! Embedding problems on the query path (provider disabled, model
//! unreachable, unusable vector) are logged and degrade as above. Storage
//! errors are returned.

use anyhow::Result;
use catalog_mirror_core::embedding::Embedder;
use catalog_mirror_core::models::{SearchHit, StoredRecord};
use catalog_mirror_core::query::clamp_limit;
use catalog_mirror_core::search::{merge_hybrid, Candidate, SearchMode};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;

use crate::config::{Config, EmbeddingConfig, RetrievalConfig};
use crate::db;
use crate::embedding;
use crate::fts;
use crate::semantic;
use crate::store::record_from_row;

/// Full product row by id. Binds: id.
pub const GET_BY_KEY_SQL: &str = "SELECT id, name, brands, categories, countries, \
    energy_kcal, fat, saturated_fat, carbohydrates, sugars, proteins, salt, fiber, \
    nutriscore_grade, nova_group, ecoscore_grade, completeness, complete_macros, \
    last_modified_t, raw_data, search_text, created_at, updated_at \
    FROM products WHERE id = ?1";

/// Every statement the engine runs, prepared on each pooled connection.
const READ_STATEMENTS: &[&str] = &[
    GET_BY_KEY_SQL,
    fts::KEYWORD_SEARCH_SQL,
    fts::KEYWORD_CANDIDATES_SQL,
    semantic::VECTOR_SCAN_SQL,
];

pub struct QueryEngine {
    pool: SqlitePool,
    retrieval: RetrievalConfig,
    embedding: EmbeddingConfig,
    embedder: Option<Arc<dyn Embedder>>,
}

impl QueryEngine {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect_reader(config, READ_STATEMENTS).await?;
        Ok(Self {
            pool,
            retrieval: config.retrieval.clone(),
            embedding: config.embedding.clone(),
            embedder: None,
        })
    }

    /// Use `embedder` for query vectors instead of the configured provider.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn default_limit(&self) -> i64 {
        self.retrieval.default_limit
    }

    /// Direct primary-key lookup. `Ok(None)` when the id is absent.
    pub async fn get_by_key(&self, id: &str) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(GET_BY_KEY_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Keyword search returning records, best match first.
    pub async fn search(&self, term: &str, limit: i64, complete_only: bool) -> Result<Vec<StoredRecord>> {
        let hits = self
            .search_hits(term, limit, complete_only, SearchMode::Keyword)
            .await?;
        Ok(hits.into_iter().map(|h| h.record).collect())
    }

    /// Search in any mode, keeping scores. `limit` is clamped to `1..=100`;
    /// a blank `term` yields no hits.
    pub async fn search_hits(
        &self,
        term: &str,
        limit: i64,
        complete_only: bool,
        mode: SearchMode,
    ) -> Result<Vec<SearchHit>> {
        if term.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = clamp_limit(limit);

        match mode {
            SearchMode::Keyword => fts::keyword_search(&self.pool, term, complete_only, limit).await,
            SearchMode::Semantic => self.semantic_hits(term, limit, complete_only).await,
            SearchMode::Hybrid => self.hybrid_hits(term, limit, complete_only).await,
        }
    }

    /// Close the read pool. Later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn semantic_hits(&self, term: &str, limit: i64, complete_only: bool) -> Result<Vec<SearchHit>> {
        let Some((model, query)) = self.query_vector(term).await else {
            return Ok(Vec::new());
        };

        let neighbours =
            semantic::nearest(&self.pool, &model, &query, limit as usize, complete_only).await?;
        let ranked = neighbours
            .into_iter()
            .map(|(id, distance)| (id, -(distance as f64)));

        self.hydrate(ranked, complete_only, limit).await
    }

    async fn hybrid_hits(&self, term: &str, limit: i64, complete_only: bool) -> Result<Vec<SearchHit>> {
        let candidate_k = self.retrieval.candidate_k.max(limit);
        let keyword = fts::keyword_candidates(&self.pool, term, complete_only, candidate_k).await?;

        let vector: Vec<Candidate> = match self.query_vector(term).await {
            Some((model, query)) => {
                semantic::nearest(&self.pool, &model, &query, candidate_k as usize, complete_only)
                    .await?
                    .into_iter()
                    .map(|(id, distance)| Candidate::new(id, -(distance as f64)))
                    .collect()
            }
            None => Vec::new(),
        };

        let merged = merge_hybrid(&keyword, &vector, self.retrieval.hybrid_alpha);
        self.hydrate(merged.into_iter(), complete_only, limit).await
    }

    /// Embed `term` with the active embedder, or `None` (logged) when that
    /// is not possible.
    async fn query_vector(&self, term: &str) -> Option<(String, Vec<f32>)> {
        let embedder = match &self.embedder {
            Some(e) => Arc::clone(e),
            None if self.embedding.is_enabled() => {
                match embedding::shared_embedder(&self.embedding).await {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(error = %e, "embedder unavailable; semantic channel empty");
                        return None;
                    }
                }
            }
            None => {
                warn!("embeddings disabled; semantic channel empty");
                return None;
            }
        };

        match embedding::embed_query(embedder.as_ref(), term).await {
            Ok(vec) => Some((embedder.model_name().to_string(), vec)),
            Err(e) => {
                warn!(error = %e, "query embedding failed; semantic channel empty");
                None
            }
        }
    }

    /// Load records for ranked ids, skipping ids that no longer resolve and,
    /// with `complete_only`, records without complete macros.
    async fn hydrate(
        &self,
        ranked: impl Iterator<Item = (String, f64)>,
        complete_only: bool,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for (id, score) in ranked {
            if hits.len() as i64 >= limit {
                break;
            }
            let Some(record) = self.get_by_key(&id).await? else {
                continue;
            };
            if complete_only && !record.record.complete_macros {
                continue;
            }
            hits.push(SearchHit { score, record });
        }
        Ok(hits)
    }
}
