//! Store schema.
//!
//! ```text
//! products          one row per Record, keyed by `id`, with a stable integer `pk`
//! products_fts      FTS5 external-content index over products.search_text
//! product_vectors   one unit-normalized embedding per product id
//! metadata          key/value (watermark, import timestamps)
//! ```
//!
//! `products_fts` stores no text of its own. Row-level triggers keep it in
//! step with single-row writes; bulk writes run without triggers and are
//! followed by a wholesale rebuild (see [`crate::fts::rebuild_index`]).
//! `pk` is an explicit `INTEGER PRIMARY KEY` so `VACUUM` never renumbers
//! the rowids the index points at.
//!
//! There are no migrations. [`ensure_schema`] creates what is missing and
//! leaves existing tables alone. Missing triggers mark an index that was
//! never finished, so it is rebuilt on open.

use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

const CREATE_PRODUCTS: &str = r#"
    CREATE TABLE IF NOT EXISTS products (
        pk INTEGER PRIMARY KEY,
        id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        brands TEXT,
        categories TEXT,
        countries TEXT,
        energy_kcal REAL,
        fat REAL,
        saturated_fat REAL,
        carbohydrates REAL,
        sugars REAL,
        proteins REAL,
        salt REAL,
        fiber REAL,
        nutriscore_grade TEXT,
        nova_group TEXT,
        ecoscore_grade TEXT,
        completeness REAL NOT NULL DEFAULT 0,
        complete_macros INTEGER NOT NULL DEFAULT 0,
        last_modified_t INTEGER NOT NULL DEFAULT 0,
        raw_data TEXT NOT NULL,
        search_text TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

const CREATE_VECTORS: &str = r#"
    CREATE TABLE IF NOT EXISTS product_vectors (
        id TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        text_hash TEXT NOT NULL,
        embedding BLOB NOT NULL,
        embedded_at INTEGER NOT NULL
    )
"#;

const CREATE_METADATA: &str = r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
"#;

const CREATE_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS idx_products_complete ON products(complete_macros)",
    "CREATE INDEX IF NOT EXISTS idx_products_updated_at ON products(updated_at)",
];

const FTS_TRIGGERS: [&str; 3] = [
    r#"
    CREATE TRIGGER IF NOT EXISTS products_fts_ai AFTER INSERT ON products BEGIN
        INSERT INTO products_fts(rowid, search_text) VALUES (new.pk, new.search_text);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS products_fts_ad AFTER DELETE ON products BEGIN
        INSERT INTO products_fts(products_fts, rowid, search_text)
        VALUES ('delete', old.pk, old.search_text);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS products_fts_au AFTER UPDATE ON products BEGIN
        INSERT INTO products_fts(products_fts, rowid, search_text)
        VALUES ('delete', old.pk, old.search_text);
        INSERT INTO products_fts(rowid, search_text) VALUES (new.pk, new.search_text);
    END
    "#,
];

const DROP_FTS_TRIGGERS: [&str; 3] = [
    "DROP TRIGGER IF EXISTS products_fts_ai",
    "DROP TRIGGER IF EXISTS products_fts_ad",
    "DROP TRIGGER IF EXISTS products_fts_au",
];

/// Create every missing table, index, and trigger. Idempotent.
///
/// A store whose FTS table or triggers are missing was left behind by an
/// interrupted bulk load or index rebuild; its index is repopulated from
/// `products` before returning.
pub async fn ensure_schema(pool: &SqlitePool, tokenizer: &str) -> Result<()> {
    create_tables(pool).await?;

    if fts_exists(pool).await? && fts_triggers_installed(pool).await? {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    let products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(&mut *tx)
        .await?;
    rebuild_fts(&mut tx, tokenizer).await?;
    tx.commit().await?;

    if products > 0 {
        warn!(products, "search index was incomplete; repopulated from products");
    }
    Ok(())
}

/// Drop everything and recreate the tables and an empty FTS index, without
/// triggers. Used before a bulk load.
pub async fn reinitialize(pool: &SqlitePool, tokenizer: &str) -> Result<()> {
    let mut conn = pool.acquire().await?;
    drop_fts_triggers(&mut conn).await?;
    for table in ["products_fts", "product_vectors", "products", "metadata"] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&mut *conn)
            .await?;
    }
    debug!("dropped existing schema");
    drop(conn);

    create_tables(pool).await?;
    let mut conn = pool.acquire().await?;
    create_fts(&mut conn, tokenizer).await?;
    Ok(())
}

/// Drop and recreate `products_fts`, repopulate it from `products`, and
/// reinstall the triggers. Callers run this inside a transaction so a
/// crash leaves either the old index or the new one.
pub async fn rebuild_fts(conn: &mut SqliteConnection, tokenizer: &str) -> Result<()> {
    drop_fts_triggers(conn).await?;
    drop_fts(conn).await?;
    create_fts(conn, tokenizer).await?;
    sqlx::query("INSERT INTO products_fts(products_fts) VALUES ('rebuild')")
        .execute(&mut *conn)
        .await?;
    install_fts_triggers(conn).await?;
    Ok(())
}

pub async fn install_fts_triggers(conn: &mut SqliteConnection) -> Result<()> {
    for ddl in FTS_TRIGGERS {
        sqlx::query(ddl).execute(&mut *conn).await?;
    }
    Ok(())
}

pub async fn drop_fts_triggers(conn: &mut SqliteConnection) -> Result<()> {
    for ddl in DROP_FTS_TRIGGERS {
        sqlx::query(ddl).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Create `products_fts` with the given tokenizer. The tokenizer must
/// already be validated (see `config::load_config`); it is spliced into
/// the DDL.
pub async fn create_fts(conn: &mut SqliteConnection, tokenizer: &str) -> Result<()> {
    let ddl = format!(
        "CREATE VIRTUAL TABLE products_fts USING fts5(\
            search_text, \
            content='products', \
            content_rowid='pk', \
            tokenize='{}'\
        )",
        tokenizer.trim()
    );
    sqlx::query(&ddl).execute(&mut *conn).await?;
    Ok(())
}

pub async fn drop_fts(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DROP TABLE IF EXISTS products_fts")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn create_tables(pool: &SqlitePool) -> Result<()> {
    for ddl in [CREATE_PRODUCTS, CREATE_VECTORS, CREATE_METADATA] {
        sqlx::query(ddl).execute(pool).await?;
    }
    for ddl in CREATE_INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

async fn fts_exists(pool: &SqlitePool) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='products_fts'",
    )
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

async fn fts_triggers_installed(pool: &SqlitePool) -> Result<bool> {
    let installed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='trigger' \
         AND name IN ('products_fts_ai', 'products_fts_ad', 'products_fts_au')",
    )
    .fetch_one(pool)
    .await?;
    Ok(installed as usize == FTS_TRIGGERS.len())
}
