use anyhow::Result;
use catalog_mirror_core::search::SearchMode;

use crate::config::Config;
use crate::query::QueryEngine;

pub async fn run_search(
    config: &Config,
    term: &str,
    mode: &str,
    limit: Option<i64>,
    complete_only: bool,
) -> Result<()> {
    let mode: SearchMode = mode.parse()?;

    if term.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let engine = QueryEngine::open(config).await?;
    let limit = limit.unwrap_or_else(|| engine.default_limit());
    let result = engine.search_hits(term, limit, complete_only, mode).await;
    engine.close().await;
    let hits = result?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let r = &hit.record.record;
        println!("{}. [{:.2}] {}", i + 1, hit.score, r.name);
        println!("    code: {}", r.id);
        if let Some(ref brands) = r.brands {
            println!("    brands: {}", brands);
        }
        match r.nutrients.energy_kcal {
            Some(kcal) => println!("    energy: {} kcal/100g", kcal),
            None => println!("    energy: -"),
        }
        println!(
            "    complete: {}",
            if r.complete_macros { "yes" } else { "no" }
        );
        println!();
    }

    Ok(())
}
