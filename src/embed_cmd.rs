use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding;
use crate::semantic::{self, EmbedOptions, EmbedReport};
use crate::store::CatalogWriter;

/// Find and embed products that are missing or have stale embeddings.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let embedder = embedding::shared_embedder(&config.embedding).await?;
    let opts = EmbedOptions {
        batch_size: batch_size_override.unwrap_or(config.embedding.batch_size),
        page_size: config.embedding.page_size,
        limit,
        dry_run,
    };

    let writer = CatalogWriter::open(config).await?;
    let result = semantic::embed_pending(&writer, embedder.as_ref(), &opts).await;
    writer.close().await;
    let report = result?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  products needing embeddings: {}", report.pending);
        return Ok(());
    }

    if report.pending == 0 {
        println!("embed pending");
        println!("  all products up to date");
        return Ok(());
    }

    print_report("embed pending", embedder.model_name(), &report);
    Ok(())
}

/// Delete all embeddings and regenerate them for every product.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let embedder = embedding::shared_embedder(&config.embedding).await?;
    let opts = EmbedOptions {
        batch_size: batch_size_override.unwrap_or(config.embedding.batch_size),
        page_size: config.embedding.page_size,
        limit: None,
        dry_run: false,
    };

    let writer = CatalogWriter::open(config).await?;
    let result = semantic::embed_rebuild(&writer, embedder.as_ref(), &opts).await;
    writer.close().await;
    let report = result?;

    print_report("embed rebuild", embedder.model_name(), &report);
    Ok(())
}

fn print_report(title: &str, model: &str, report: &EmbedReport) {
    println!("{}", title);
    println!("  model: {}", model);
    println!("  pending: {}", report.pending);
    println!("  embedded: {}", report.embedded);
    println!("  unchanged: {}", report.unchanged);
    println!("  failed: {}", report.failed);
}
