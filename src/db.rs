//! SQLite connection pools.
//!
//! Two constructors, two capabilities. [`connect_writer`] opens the single
//! read-write connection used by the loaders; [`connect_reader`] opens a
//! read-only pool for the query path that never creates or repairs a file.

use anyhow::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Executor;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;
use crate::error::CatalogError;

/// Open the write pool, creating the database file if needed.
///
/// The pool holds exactly one connection so every write in the process is
/// serialized through it.
pub async fn connect_writer(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| CatalogError::storage(db_path, e))?;

    Ok(pool)
}

/// Open the read-only query pool.
///
/// Fails with [`CatalogError::StorageUnavailable`] when the file does not
/// exist or any of `statements` cannot be prepared against it (which is
/// also how a store without the expected tables is detected). Every pooled
/// connection prepares `statements` once when it is opened, so queries
/// never pay for compilation.
pub async fn connect_reader(config: &Config, statements: &'static [&'static str]) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if !db_path.is_file() {
        return Err(CatalogError::storage(db_path, "database file does not exist").into());
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .read_only(true)
        .create_if_missing(false)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.db.read_connections)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                for sql in statements {
                    (&mut *conn).prepare(sql).await?;
                }
                Ok(())
            })
        })
        .connect_with(options)
        .await
        .map_err(|e| CatalogError::storage(db_path, e))?;

    Ok(pool)
}
