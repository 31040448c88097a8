//! Core data models for the catalog replica.
//!
//! A [`Record`] is the canonical form of one catalog line after the
//! transformer has run. [`StoredRecord`] adds the bookkeeping timestamps the
//! store maintains on every write.

use serde::{Deserialize, Serialize};

/// Per-100g nutrient values. Each field is absent when the source line
/// does not carry a usable number for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
    pub energy_kcal: Option<f64>,
    pub fat: Option<f64>,
    pub saturated_fat: Option<f64>,
    pub carbohydrates: Option<f64>,
    pub sugars: Option<f64>,
    pub proteins: Option<f64>,
    pub salt: Option<f64>,
    pub fiber: Option<f64>,
}

impl Nutrients {
    /// True when energy, fat, carbohydrates, and protein are all present.
    pub fn has_macros(&self) -> bool {
        self.energy_kcal.is_some()
            && self.fat.is_some()
            && self.carbohydrates.is_some()
            && self.proteins.is_some()
    }
}

/// Grading fields copied from the source line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grades {
    pub nutriscore: Option<String>,
    pub nova_group: Option<String>,
    pub ecoscore: Option<String>,
}

/// Canonical catalog record.
///
/// `id` is the product code and never changes. `complete_macros` implies
/// `completeness == 1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub name: String,
    pub brands: Option<String>,
    pub categories: Option<String>,
    pub countries: Option<String>,
    pub nutrients: Nutrients,
    pub grades: Grades,
    pub completeness: f64,
    pub complete_macros: bool,
    /// Source modification time, epoch seconds (0 when unknown).
    pub last_modified_t: i64,
    /// The source line, unmodified apart from the trailing line terminator.
    pub raw_data: String,
    pub search_text: String,
}

/// A [`Record`] as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: Record,
    /// Epoch seconds of the first write of this id.
    pub created_at: i64,
    /// Epoch seconds of the latest write of this id.
    pub updated_at: i64,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Higher is better. Keyword mode uses negated BM25, semantic mode uses
    /// negated L2 distance, hybrid mode uses the merged score in `[0, 1]`.
    pub score: f64,
    pub record: StoredRecord,
}
