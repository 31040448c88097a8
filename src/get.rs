//! Product lookup by code.
//!
//! Used by `catmirror get`. The HTTP equivalent lives in
//! [`crate::server`] and shares [`crate::query::QueryEngine::get_by_key`].

use anyhow::{bail, Result};
use catalog_mirror_core::models::StoredRecord;

use crate::config::Config;
use crate::error::CatalogError;
use crate::query::QueryEngine;

/// CLI entry point: look up one product and print it.
pub async fn run_get(config: &Config, code: &str) -> Result<()> {
    let code = code.trim();
    if code.is_empty() {
        return Err(CatalogError::InvalidParameter("product code must not be empty".into()).into());
    }

    let engine = QueryEngine::open(config).await?;
    let found = engine.get_by_key(code).await;
    engine.close().await;

    let Some(product) = found? else {
        bail!("product not found: {}", code);
    };

    print_product(&product);
    Ok(())
}

fn print_product(product: &StoredRecord) {
    let r = &product.record;
    let n = &r.nutrients;

    println!("--- Product ---");
    println!("code:         {}", r.id);
    println!("name:         {}", r.name);
    if let Some(ref brands) = r.brands {
        println!("brands:       {}", brands);
    }
    if let Some(ref categories) = r.categories {
        println!("categories:   {}", categories);
    }
    if let Some(ref countries) = r.countries {
        println!("countries:    {}", countries);
    }
    println!("completeness: {:.2}", r.completeness);
    println!("complete:     {}", if r.complete_macros { "yes" } else { "no" });
    println!("modified:     {}", format_ts_iso(r.last_modified_t));
    println!("updated_at:   {}", format_ts_iso(product.updated_at));
    println!();

    println!("--- Nutrients (per 100g) ---");
    print_nutrient("energy_kcal", n.energy_kcal);
    print_nutrient("fat", n.fat);
    print_nutrient("saturated_fat", n.saturated_fat);
    print_nutrient("carbohydrates", n.carbohydrates);
    print_nutrient("sugars", n.sugars);
    print_nutrient("proteins", n.proteins);
    print_nutrient("salt", n.salt);
    print_nutrient("fiber", n.fiber);

    let g = &r.grades;
    if g.nutriscore.is_some() || g.nova_group.is_some() || g.ecoscore.is_some() {
        println!();
        println!("--- Grades ---");
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        println!("nutriscore:   {}", show(&g.nutriscore));
        println!("nova_group:   {}", show(&g.nova_group));
        println!("ecoscore:     {}", show(&g.ecoscore));
    }
}

fn print_nutrient(label: &str, value: Option<f64>) {
    match value {
        Some(v) => println!("{:<14}{}", format!("{}:", label), v),
        None => println!("{:<14}-", format!("{}:", label)),
    }
}

fn format_ts_iso(ts: i64) -> String {
    if ts <= 0 {
        return "unknown".to_string();
    }
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
