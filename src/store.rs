//! Write handle over the primary store.
//!
//! [`CatalogWriter`] is the only type in the crate that mutates `products`
//! or `metadata`. The query path never sees one; it works from the
//! read-only pool opened by [`crate::query::QueryEngine`].

use anyhow::{Context, Result};
use catalog_mirror_core::models::{Grades, Nutrients, Record, StoredRecord};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::config::Config;
use crate::db;
use crate::schema;

pub const WATERMARK_KEY: &str = "delta_watermark";
pub const LAST_FULL_IMPORT_KEY: &str = "last_full_import";
pub const LAST_DELTA_SYNC_KEY: &str = "last_delta_sync";

/// Full-record upsert. Every content column is overwritten on conflict;
/// `created_at` and `pk` survive so the FTS update trigger sees the same row.
const UPSERT_PRODUCT: &str = r#"
    INSERT INTO products (
        id, name, brands, categories, countries,
        energy_kcal, fat, saturated_fat, carbohydrates, sugars, proteins, salt, fiber,
        nutriscore_grade, nova_group, ecoscore_grade,
        completeness, complete_macros, last_modified_t, raw_data, search_text,
        created_at, updated_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        brands = excluded.brands,
        categories = excluded.categories,
        countries = excluded.countries,
        energy_kcal = excluded.energy_kcal,
        fat = excluded.fat,
        saturated_fat = excluded.saturated_fat,
        carbohydrates = excluded.carbohydrates,
        sugars = excluded.sugars,
        proteins = excluded.proteins,
        salt = excluded.salt,
        fiber = excluded.fiber,
        nutriscore_grade = excluded.nutriscore_grade,
        nova_group = excluded.nova_group,
        ecoscore_grade = excluded.ecoscore_grade,
        completeness = excluded.completeness,
        complete_macros = excluded.complete_macros,
        last_modified_t = excluded.last_modified_t,
        raw_data = excluded.raw_data,
        search_text = excluded.search_text,
        updated_at = excluded.updated_at
"#;

const UPSERT_METADATA: &str = r#"
    INSERT INTO metadata (key, value) VALUES (?, ?)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#;

pub struct CatalogWriter {
    pool: SqlitePool,
    tokenizer: String,
}

impl CatalogWriter {
    /// Open (or create) the store and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect_writer(config).await?;
        schema::ensure_schema(&pool, &config.index.tokenizer).await?;
        Ok(Self {
            pool,
            tokenizer: config.index.tokenizer.trim().to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn tokenizer(&self) -> &str {
        &self.tokenizer
    }

    /// Destroy all data and recreate empty tables without FTS triggers.
    pub async fn reinitialize(&self) -> Result<()> {
        schema::reinitialize(&self.pool, &self.tokenizer).await
    }

    /// Upsert a batch of records in one transaction. Later records in the
    /// batch win over earlier ones with the same id.
    pub async fn upsert_batch(&self, records: &[Record]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for rec in records {
            let n = &rec.nutrients;
            let g = &rec.grades;
            sqlx::query(UPSERT_PRODUCT)
                .bind(&rec.id)
                .bind(&rec.name)
                .bind(&rec.brands)
                .bind(&rec.categories)
                .bind(&rec.countries)
                .bind(n.energy_kcal)
                .bind(n.fat)
                .bind(n.saturated_fat)
                .bind(n.carbohydrates)
                .bind(n.sugars)
                .bind(n.proteins)
                .bind(n.salt)
                .bind(n.fiber)
                .bind(&g.nutriscore)
                .bind(&g.nova_group)
                .bind(&g.ecoscore)
                .bind(rec.completeness)
                .bind(rec.complete_macros)
                .bind(rec.last_modified_t)
                .bind(&rec.raw_data)
                .bind(&rec.search_text)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to upsert product {}", rec.id))?;
        }

        tx.commit().await?;
        debug!(records = records.len(), "committed batch");
        Ok(records.len() as u64)
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(UPSERT_METADATA)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The end timestamp of the last fully applied delta, if any.
    pub async fn watermark(&self) -> Result<Option<i64>> {
        match self.get_metadata(WATERMARK_KEY).await? {
            Some(raw) => {
                let value = raw.trim().parse::<i64>().with_context(|| {
                    format!("Stored {} is not an epoch-seconds value: '{}'", WATERMARK_KEY, raw)
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Overwrite the watermark. Used for seeding and external resets.
    pub async fn set_watermark(&self, value: i64) -> Result<()> {
        self.set_metadata(WATERMARK_KEY, &value.to_string()).await
    }

    /// Record that a delta ending at `end` is fully applied. The watermark
    /// and the sync timestamp are written together.
    pub async fn advance_watermark(&self, end: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query(UPSERT_METADATA)
            .bind(WATERMARK_KEY)
            .bind(end.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query(UPSERT_METADATA)
            .bind(LAST_DELTA_SYNC_KEY)
            .bind(now.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn count_products(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Flush and close the write connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Decode a full product row, as selected by
/// [`GET_BY_KEY_SQL`](crate::query::GET_BY_KEY_SQL).
pub fn record_from_row(row: &SqliteRow) -> Result<StoredRecord> {
    let record = Record {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        brands: row.try_get("brands")?,
        categories: row.try_get("categories")?,
        countries: row.try_get("countries")?,
        nutrients: Nutrients {
            energy_kcal: row.try_get("energy_kcal")?,
            fat: row.try_get("fat")?,
            saturated_fat: row.try_get("saturated_fat")?,
            carbohydrates: row.try_get("carbohydrates")?,
            sugars: row.try_get("sugars")?,
            proteins: row.try_get("proteins")?,
            salt: row.try_get("salt")?,
            fiber: row.try_get("fiber")?,
        },
        grades: Grades {
            nutriscore: row.try_get("nutriscore_grade")?,
            nova_group: row.try_get("nova_group")?,
            ecoscore: row.try_get("ecoscore_grade")?,
        },
        completeness: row.try_get("completeness")?,
        complete_macros: row.try_get("complete_macros")?,
        last_modified_t: row.try_get("last_modified_t")?,
        raw_data: row.try_get("raw_data")?,
        search_text: row.try_get("search_text")?,
    };

    Ok(StoredRecord {
        record,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
