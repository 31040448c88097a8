//! Score normalization and hybrid merging.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch keyword candidates (negated BM25, higher = better).
//! 2. Fetch vector candidates (negated L2 distance, higher = better).
//! 3. Normalize each set to `[0, 1]` with min-max normalization.
//! 4. Merge: `score = (1 - α) × keyword + α × semantic`, absent = 0.
//! 5. Sort by score (desc), then id (asc) for determinism.

use std::collections::HashMap;
use std::str::FromStr;

/// Retrieval mode for the query engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Keyword,
    Semantic,
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => anyhow::bail!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                other
            ),
        }
    }
}

/// A candidate id with its raw channel score (higher = better).
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub raw_score: f64,
}

impl Candidate {
    pub fn new(id: impl Into<String>, raw_score: f64) -> Self {
        Self {
            id: id.into(),
            raw_score,
        }
    }
}

/// Min-max normalize scores to `[0, 1]`. A set where every score is equal
/// normalizes to all `1.0`.
pub fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// Merge keyword and vector candidates into one ranked `(id, score)` list.
pub fn merge_hybrid(keyword: &[Candidate], vector: &[Candidate], alpha: f64) -> Vec<(String, f64)> {
    let kw: HashMap<&str, f64> = normalize_scores(keyword)
        .into_iter()
        .map(|(c, s)| (c.id.as_str(), s))
        .collect();
    let vec: HashMap<&str, f64> = normalize_scores(vector)
        .into_iter()
        .map(|(c, s)| (c.id.as_str(), s))
        .collect();

    let mut ids: Vec<&str> = keyword.iter().chain(vector.iter()).map(|c| c.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut merged: Vec<(String, f64)> = ids
        .into_iter()
        .map(|id| {
            let k = kw.get(id).copied().unwrap_or(0.0);
            let v = vec.get(id).copied().unwrap_or(0.0);
            (id.to_string(), (1.0 - alpha) * k + alpha * v)
        })
        .collect();

    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    merged
}
