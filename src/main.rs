//! # Catalog Mirror CLI (`catmirror`)
//!
//! ## Usage
//!
//! ```bash
//! catmirror --config ./config/catmirror.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catmirror init` | Create the store and schema if absent |
//! | `catmirror import <dump>` | Destructive full load from a JSONL dump (`.gz` ok) |
//! | `catmirror sync` | Apply pending deltas past the watermark |
//! | `catmirror index rebuild` | Rebuild the lexical index from scratch |
//! | `catmirror embed pending` | Embed missing or stale products |
//! | `catmirror embed rebuild` | Delete and regenerate all embeddings |
//! | `catmirror get <code>` | Show one product |
//! | `catmirror search "<term>"` | Keyword, semantic, or hybrid search |
//! | `catmirror stats` | Store summary |
//! | `catmirror watermark show\|set` | Inspect or reset the delta watermark |
//! | `catmirror serve` | Start the read-only HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! catmirror import ./openfoodfacts-products.jsonl.gz
//! catmirror sync --dry-run
//! catmirror search "nutella" --complete-only
//! RUST_LOG=catalog_mirror=debug catmirror sync
//! ```

use catalog_mirror::{bulk, config, delta_sync, embed_cmd, fts, get, search, server, stats};
use catalog_mirror::store::CatalogWriter;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// Catalog Mirror: a local, searchable replica of a product catalog kept
/// current from published deltas.
#[derive(Parser)]
#[command(
    name = "catmirror",
    about = "Catalog Mirror: a local product-catalog replica with keyword and semantic search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catmirror.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store schema.
    ///
    /// Creates the SQLite file and all tables if they do not exist. Safe to
    /// run repeatedly; an existing schema is left untouched.
    Init,

    /// Replace the store contents with a full dump.
    ///
    /// Destroys all existing data, loads every line of the dump, rebuilds
    /// the lexical index, and seeds the delta watermark.
    Import {
        /// Path to a JSONL dump, optionally gzip-compressed.
        dump: PathBuf,

        /// Records per write transaction.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Apply published deltas newer than the watermark, oldest first.
    Sync {
        /// Show which deltas would be applied without fetching them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Lexical index maintenance.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Embedding management.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show one product by code.
    Get {
        /// Product code (barcode).
        code: String,
    },

    /// Search products.
    Search {
        /// Search term.
        query: String,

        /// Search mode: keyword, semantic, or hybrid.
        #[arg(long, default_value = "keyword")]
        mode: String,

        /// Maximum results (clamped to 1..=100).
        #[arg(long)]
        limit: Option<i64>,

        /// Only products with all macronutrients present.
        #[arg(long)]
        complete_only: bool,
    },

    /// Show store statistics.
    Stats,

    /// Inspect or reset the delta watermark.
    Watermark {
        #[command(subcommand)]
        action: WatermarkAction,
    },

    /// Start the HTTP API.
    Serve,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Drop and rebuild the lexical index from the products table.
    Rebuild,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed products whose vector is missing or stale.
    Pending {
        /// Maximum number of products to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Texts per embedding call.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Count pending products without embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete all embeddings and regenerate them.
    Rebuild {
        /// Texts per embedding call.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[derive(Subcommand)]
enum WatermarkAction {
    /// Print the watermark and the last import/sync times.
    Show,

    /// Overwrite the watermark (epoch seconds).
    Set {
        /// New watermark value.
        value: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("catalog_mirror=info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let writer = CatalogWriter::open(&cfg).await?;
            writer.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Import { dump, batch_size } => {
            bulk::run_import(&cfg, &dump, batch_size).await?;
        }
        Commands::Sync { dry_run } => {
            delta_sync::run_sync(&cfg, dry_run).await?;
        }
        Commands::Index { action } => match action {
            IndexAction::Rebuild => fts::run_rebuild(&cfg).await?,
        },
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?,
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?
            }
        },
        Commands::Get { code } => {
            get::run_get(&cfg, &code).await?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            complete_only,
        } => {
            search::run_search(&cfg, &query, &mode, limit, complete_only).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Watermark { action } => match action {
            WatermarkAction::Show => delta_sync::run_watermark_show(&cfg).await?,
            WatermarkAction::Set { value } => delta_sync::run_watermark_set(&cfg, value).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
