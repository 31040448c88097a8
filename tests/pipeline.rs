//! In-process tests of the load → sync → index → query pipeline against
//! temporary SQLite stores.

use async_trait::async_trait;
use catalog_mirror::bulk::bulk_load;
use catalog_mirror::config::Config;
use catalog_mirror::delta_sync::{plan, sync_deltas};
use catalog_mirror::error::CatalogError;
use catalog_mirror::fetch::{open_payload, DeltaSource, DirDeltaSource};
use catalog_mirror::fts;
use catalog_mirror::schema;
use catalog_mirror::query::QueryEngine;
use catalog_mirror::semantic::{embed_pending, EmbedOptions};
use catalog_mirror::server::run_server;
use catalog_mirror::store::CatalogWriter;
use catalog_mirror_core::embedding::Embedder;
use catalog_mirror_core::search::SearchMode;
use catalog_mirror_core::transform::transform_line;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const NUTELLA_CODE: &str = "3017620422003";
const CRACKERS_CODE: &str = "0000000000017";
const BULK_WATERMARK: i64 = 1_700_000_000;
const D1: &str = "openfoodfacts_products_1700000000_1700086400.json";
const D2: &str = "openfoodfacts_products_1700086400_1700172800.json";
const D1_END: i64 = 1_700_086_400;
const D2_END: i64 = 1_700_172_800;

// ─── Fixtures ───────────────────────────────────────────────────────

fn nutella() -> String {
    json!({
        "code": NUTELLA_CODE,
        "product_name": "Nutella",
        "brands": "Ferrero",
        "categories_tags": ["en:spreads", "en:hazelnut-spreads"],
        "labels_tags": ["en:green-dot"],
        "nutriments": {
            "energy-kcal_100g": 539,
            "fat_100g": 30.9,
            "carbohydrates_100g": 57.5,
            "proteins_100g": 6.3
        },
        "completeness": 0.875,
        "last_modified_t": BULK_WATERMARK,
        "nutriscore_grade": "e"
    })
    .to_string()
}

fn chocolate() -> String {
    json!({
        "code": "7610400071680",
        "product_name": "Excellence 70% Cacao",
        "brands": "Lindt",
        "categories_tags": ["en:dark-chocolates"],
        "nutriments": {
            "energy-kcal_100g": "566",
            "fat_100g": "41",
            "carbohydrates_100g": "34",
            "proteins_100g": "9.5"
        },
        "completeness": 0.9,
        "last_modified_t": 1_699_000_000
    })
    .to_string()
}

fn crackers(name: &str, modified: i64) -> String {
    json!({
        "code": CRACKERS_CODE,
        "product_name": name,
        "categories_tags": ["en:crackers"],
        "completeness": 0.4,
        "last_modified_t": modified
    })
    .to_string()
}

fn numbered_product(i: usize, name: &str) -> String {
    json!({
        "code": format!("{:013}", 5_000_000 + i),
        "product_name": format!("{} {}", name, i),
        "completeness": 0.5,
        "last_modified_t": 1_600_000_000
    })
    .to_string()
}

fn base_dump() -> Vec<String> {
    vec![
        nutella(),
        chocolate(),
        crackers("Oldbrand Crackers", 1_699_999_000),
        "{not json".to_string(),
        json!({"product_name": "Nameless code"}).to_string(),
        json!({"code": "123"}).to_string(),
    ]
}

fn test_config(tmp: &TempDir) -> Config {
    let mut cfg = Config::with_db_path(tmp.path().join("data").join("catalog.sqlite"));
    cfg.import.batch_size = 2;
    cfg.delta.batch_size = 10;
    cfg
}

async fn load(cfg: &Config, lines: &[String]) -> catalog_mirror::bulk::BulkReport {
    let writer = CatalogWriter::open(cfg).await.unwrap();
    let dump = lines.join("\n");
    let report = bulk_load(&writer, Cursor::new(dump.into_bytes()), cfg.import.batch_size, "test-dump")
        .await
        .unwrap();
    writer.close().await;
    report
}

/// A delta directory with D2 listed before D1, one already-covered delta,
/// and a non-delta entry.
fn delta_dir(root: &Path) -> PathBuf {
    let dir = root.join("deltas");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("index.txt"),
        format!(
            "{}\nREADME.txt\nopenfoodfacts_products_1699900000_1700000000.json\n{}\n",
            D2, D1
        ),
    )
    .unwrap();

    let d1 = [
        crackers("Midbrand Crackers", 1_700_050_000),
        json!({
            "code": "8000500310427",
            "product_name": "Hazelnut Wafers",
            "last_modified_t": 1_700_060_000
        })
        .to_string(),
    ];
    fs::write(dir.join(D1), d1.join("\n")).unwrap();
    fs::write(dir.join(D2), crackers("Freshbrand Crackers", 1_700_150_000)).unwrap();
    dir
}

async fn ids(engine: &QueryEngine, term: &str) -> Vec<String> {
    engine
        .search(term, 100, false)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.record.id)
        .collect()
}

async fn ids_limited(engine: &QueryEngine, term: &str, limit: i64) -> Vec<String> {
    engine
        .search(term, limit, false)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.record.id)
        .collect()
}

/// Bag-of-words vectors from hashed lowercase tokens. Deterministic and
/// offline, and texts sharing words land close together.
struct HashEmbedder;

const HASH_DIMS: usize = 256;

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "test-hash"
    }

    fn dims(&self) -> usize {
        HASH_DIMS
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; HASH_DIMS];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let h = word
            .bytes()
            .fold(2_166_136_261u32, |h, b| (h ^ b as u32).wrapping_mul(16_777_619));
        v[h as usize % HASH_DIMS] += 1.0;
    }
    v
}

// ─── Bulk load ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_bulk_load_counts_skips_and_seeds_watermark() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    let report = load(&cfg, &base_dump()).await;
    assert_eq!(report.stats.lines, 6);
    assert_eq!(report.stats.upserted, 3);
    assert_eq!(report.stats.skipped_decode, 1);
    assert_eq!(report.stats.skipped_missing_code, 1);
    assert_eq!(report.stats.skipped_missing_name, 1);
    assert_eq!(report.stats.batches, 2);
    assert_eq!(report.indexed, 3);
    assert_eq!(report.watermark, Some(BULK_WATERMARK));

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    assert_eq!(writer.watermark().await.unwrap(), Some(BULK_WATERMARK));
    assert_eq!(writer.count_products().await.unwrap(), 3);
    writer.close().await;
}

#[tokio::test]
async fn test_bulk_load_replaces_previous_contents() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    load(&cfg, &base_dump()).await;
    load(&cfg, &[chocolate()]).await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    assert!(engine.get_by_key(NUTELLA_CODE).await.unwrap().is_none());
    assert!(engine.get_by_key("7610400071680").await.unwrap().is_some());
    assert!(ids(&engine, "nutella").await.is_empty());
    engine.close().await;
}

#[tokio::test]
async fn test_bulk_load_reads_gzip_dump() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    let path = tmp.path().join("dump.jsonl.gz");
    let mut enc = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
    enc.write_all(base_dump().join("\n").as_bytes()).unwrap();
    enc.finish().unwrap();

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    let report = bulk_load(&writer, open_payload(&path).unwrap(), 100, "dump.jsonl.gz")
        .await
        .unwrap();
    writer.close().await;

    assert_eq!(report.stats.upserted, 3);
    assert_eq!(report.stats.skipped(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bulk_load_on_multi_thread_runtime() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    let path = tmp.path().join("dump.jsonl.gz");
    let mut enc = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
    enc.write_all(base_dump().join("\n").as_bytes()).unwrap();
    enc.finish().unwrap();

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    let report = bulk_load(&writer, open_payload(&path).unwrap(), 2, "dump.jsonl.gz")
        .await
        .unwrap();
    writer.close().await;

    assert_eq!(report.stats.upserted, 3);
    assert_eq!(report.indexed, 3);
}

#[tokio::test]
async fn test_open_repairs_index_dropped_mid_rebuild() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;

    // State left by a crash between dropping and recreating the index.
    let writer = CatalogWriter::open(&cfg).await.unwrap();
    let mut conn = writer.pool().acquire().await.unwrap();
    schema::drop_fts_triggers(&mut conn).await.unwrap();
    schema::drop_fts(&mut conn).await.unwrap();
    drop(conn);
    writer.close().await;

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    writer.close().await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    assert!(engine.get_by_key(NUTELLA_CODE).await.unwrap().is_some());
    assert_eq!(ids(&engine, "nutella").await, vec![NUTELLA_CODE]);
    engine.close().await;
}

#[tokio::test]
async fn test_open_repairs_index_after_interrupted_bulk_load() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    // Batches committed with triggers off, then the process died before
    // the index rebuild.
    let writer = CatalogWriter::open(&cfg).await.unwrap();
    writer.reinitialize().await.unwrap();
    let record = transform_line(nutella().as_bytes()).unwrap();
    writer.upsert_batch(&[record]).await.unwrap();
    writer.close().await;

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    writer.close().await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    assert_eq!(ids(&engine, "nutella").await, vec![NUTELLA_CODE]);
    engine.close().await;

    // Later single-row writes are indexed by the reinstalled triggers.
    let writer = CatalogWriter::open(&cfg).await.unwrap();
    let record = transform_line(chocolate().as_bytes()).unwrap();
    writer.upsert_batch(&[record]).await.unwrap();
    writer.close().await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    assert_eq!(ids(&engine, "lindt").await, vec!["7610400071680"]);
    engine.close().await;
}

// ─── Query engine ───────────────────────────────────────────────────

#[tokio::test]
async fn test_get_by_key_returns_full_record() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    let product = engine.get_by_key(NUTELLA_CODE).await.unwrap().unwrap();
    assert_eq!(product.record.name, "Nutella");
    assert_eq!(product.record.brands.as_deref(), Some("Ferrero"));
    assert!(product.record.complete_macros);
    assert_eq!(product.record.completeness, 1.0);
    assert_eq!(product.record.nutrients.energy_kcal, Some(539.0));
    assert_eq!(product.record.raw_data, nutella());

    assert!(engine.get_by_key("0000000000000").await.unwrap().is_none());
    engine.close().await;
}

#[tokio::test]
async fn test_keyword_search() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    assert_eq!(ids(&engine, "nutella").await, vec![NUTELLA_CODE]);
    assert_eq!(ids(&engine, "NUTELLA").await, vec![NUTELLA_CODE]);
    assert_eq!(ids(&engine, "hazelnut spreads").await, vec![NUTELLA_CODE]);
    assert_eq!(ids(&engine, NUTELLA_CODE).await, vec![NUTELLA_CODE]);
    assert_eq!(ids(&engine, "lindt").await, vec!["7610400071680"]);

    assert!(ids(&engine, "asdfghjklqwertyuiopzxcvbnm").await.is_empty());
    assert!(ids(&engine, "").await.is_empty());
    assert!(ids(&engine, "   ").await.is_empty());
    assert!(ids(&engine, "\"*:-").await.is_empty());
    engine.close().await;
}

#[tokio::test]
async fn test_complete_only_filter() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    let all = engine.search("crackers", 20, false).await.unwrap();
    assert_eq!(all.len(), 1);
    let complete = engine.search("crackers", 20, true).await.unwrap();
    assert!(complete.is_empty());
    assert!(engine
        .search("nutella", 20, true)
        .await
        .unwrap()
        .iter()
        .all(|r| r.record.complete_macros));
    engine.close().await;
}

#[tokio::test]
async fn test_limit_is_clamped() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    let lines: Vec<String> = (0..150).map(|i| numbered_product(i, "Chocolate Bar")).collect();
    load(&cfg, &lines).await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    assert_eq!(
        ids_limited(&engine, "chocolate", 1000).await,
        ids_limited(&engine, "chocolate", 100).await
    );
    assert_eq!(engine.search("chocolate", 1000, false).await.unwrap().len(), 100);
    assert_eq!(engine.search("chocolate", 0, false).await.unwrap().len(), 1);
    assert_eq!(engine.search("chocolate", -3, false).await.unwrap().len(), 1);
    assert_eq!(engine.search("chocolate", 7, false).await.unwrap().len(), 7);

    // Equal BM25 scores fall back to id order.
    let first = engine.search("chocolate", 3, false).await.unwrap();
    let first_ids: Vec<&str> = first.iter().map(|r| r.record.id.as_str()).collect();
    assert_eq!(first_ids, vec!["0000005000000", "0000005000001", "0000005000002"]);
    engine.close().await;
}

#[tokio::test]
async fn test_query_engine_requires_existing_store() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);

    let err = QueryEngine::open(&cfg).await.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<CatalogError>(),
        Some(CatalogError::StorageUnavailable { .. })
    ));
    assert!(!cfg.db.path.exists(), "query engine must not create the store");
}

// ─── Delta sync ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_deltas_apply_in_end_order() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;
    let source = DirDeltaSource::new(delta_dir(tmp.path()), "index.txt");

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    let (watermark, planned) = plan(&writer, &source).await.unwrap();
    assert_eq!(watermark, Some(BULK_WATERMARK));
    let names: Vec<&str> = planned.iter().map(|d| d.file_name.as_str()).collect();
    assert_eq!(names, vec![D1, D2]);

    let report = sync_deltas(&writer, &source, cfg.delta.batch_size).await.unwrap();
    let applied: Vec<&str> = report.applied.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(applied, vec![D1, D2]);
    assert_eq!(report.upserted(), 3);
    assert_eq!(report.watermark_before, Some(BULK_WATERMARK));
    assert_eq!(report.watermark_after, Some(D2_END));
    assert_eq!(writer.count_products().await.unwrap(), 4);
    writer.close().await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    let crackers = engine.get_by_key(CRACKERS_CODE).await.unwrap().unwrap();
    assert_eq!(crackers.record.name, "Freshbrand Crackers");
    assert!(crackers.updated_at >= crackers.created_at);

    // The lexical index followed the row updates.
    assert!(ids(&engine, "oldbrand").await.is_empty());
    assert!(ids(&engine, "midbrand").await.is_empty());
    assert_eq!(ids(&engine, "freshbrand").await, vec![CRACKERS_CODE]);
    assert_eq!(ids(&engine, "wafers").await, vec!["8000500310427"]);
    engine.close().await;
}

#[tokio::test]
async fn test_sync_with_nothing_pending_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;
    let source = DirDeltaSource::new(delta_dir(tmp.path()), "index.txt");

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    sync_deltas(&writer, &source, 10).await.unwrap();
    let again = sync_deltas(&writer, &source, 10).await.unwrap();
    assert_eq!(again.planned, 0);
    assert!(again.applied.is_empty());
    assert_eq!(again.watermark_after, Some(D2_END));
    writer.close().await;
}

#[tokio::test]
async fn test_reapplying_deltas_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;
    let source = DirDeltaSource::new(delta_dir(tmp.path()), "index.txt");

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    sync_deltas(&writer, &source, 10).await.unwrap();
    let engine = QueryEngine::open(&cfg).await.unwrap();
    let before = engine.get_by_key(CRACKERS_CODE).await.unwrap().unwrap();
    let count_before = writer.count_products().await.unwrap();

    writer.set_watermark(BULK_WATERMARK).await.unwrap();
    let report = sync_deltas(&writer, &source, 10).await.unwrap();
    assert_eq!(report.applied.len(), 2);

    let after = engine.get_by_key(CRACKERS_CODE).await.unwrap().unwrap();
    assert_eq!(after.record, before.record);
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(writer.count_products().await.unwrap(), count_before);
    assert_eq!(ids(&engine, "freshbrand").await, vec![CRACKERS_CODE]);

    engine.close().await;
    writer.close().await;
}

/// Writes a gzip payload whose first member is valid and whose second
/// member has a broken header, so reading fails after the first member's
/// lines were consumed.
fn write_corrupt_gz(path: &Path, lines: &[String]) {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(lines.join("\n").as_bytes()).unwrap();
    enc.write_all(b"\n").unwrap();
    let mut bytes = enc.finish().unwrap();
    bytes.extend_from_slice(&[0x1f, 0x8b, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef, 0x00, 0x00]);
    fs::write(path, bytes).unwrap();
}

#[tokio::test]
async fn test_interrupted_delta_is_resumed_from_the_start() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;

    let dir = tmp.path().join("deltas");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("index.txt"), format!("{}\n", D1)).unwrap();
    let lines: Vec<String> = (0..100).map(|i| numbered_product(i, "Rice Cake")).collect();
    write_corrupt_gz(&dir.join(D1), &lines);
    let source = DirDeltaSource::new(&dir, "index.txt");

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    let err = sync_deltas(&writer, &source, 10).await.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<CatalogError>(),
        Some(CatalogError::PayloadDecode { .. })
    ));
    assert!(format!("{:#}", err).contains(D1));
    assert_eq!(writer.watermark().await.unwrap(), Some(BULK_WATERMARK));

    // Repaired upstream file: the same delta is planned again and applied.
    let mut enc = GzEncoder::new(fs::File::create(dir.join(D1)).unwrap(), Compression::default());
    enc.write_all(lines.join("\n").as_bytes()).unwrap();
    enc.finish().unwrap();

    let report = sync_deltas(&writer, &source, 10).await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.upserted(), 100);
    assert_eq!(writer.watermark().await.unwrap(), Some(D1_END));
    assert_eq!(writer.count_products().await.unwrap(), 103);
    writer.close().await;
}

/// Serves the manifest from an inner source but refuses one file.
struct FlakySource {
    inner: DirDeltaSource,
    broken: String,
}

#[async_trait]
impl DeltaSource for FlakySource {
    fn describe(&self) -> String {
        "flaky".to_string()
    }

    async fn manifest(&self) -> anyhow::Result<String> {
        self.inner.manifest().await
    }

    async fn fetch(&self, file_name: &str, dest: &Path) -> anyhow::Result<()> {
        if file_name == self.broken {
            return Err(CatalogError::transfer(file_name, "connection reset").into());
        }
        self.inner.fetch(file_name, dest).await
    }
}

#[tokio::test]
async fn test_transfer_failure_keeps_earlier_deltas() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;
    let dir = delta_dir(tmp.path());

    let flaky = FlakySource {
        inner: DirDeltaSource::new(&dir, "index.txt"),
        broken: D2.to_string(),
    };
    let writer = CatalogWriter::open(&cfg).await.unwrap();
    let err = sync_deltas(&writer, &flaky, 10).await.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<CatalogError>(),
        Some(CatalogError::Transfer { .. })
    ));
    assert_eq!(writer.watermark().await.unwrap(), Some(D1_END));

    let source = DirDeltaSource::new(&dir, "index.txt");
    let report = sync_deltas(&writer, &source, 10).await.unwrap();
    let applied: Vec<&str> = report.applied.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(applied, vec![D2]);
    assert_eq!(writer.watermark().await.unwrap(), Some(D2_END));
    writer.close().await;
}

// ─── Index rebuild ──────────────────────────────────────────────────

#[tokio::test]
async fn test_rebuild_matches_incremental_index() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;
    let source = DirDeltaSource::new(delta_dir(tmp.path()), "index.txt");
    let writer = CatalogWriter::open(&cfg).await.unwrap();
    sync_deltas(&writer, &source, 10).await.unwrap();

    let terms = ["nutella", "crackers", "freshbrand", "oldbrand", "hazelnut", "lindt cacao"];
    let engine = QueryEngine::open(&cfg).await.unwrap();
    let mut incremental = Vec::new();
    for t in terms {
        incremental.push(ids(&engine, t).await);
    }
    engine.close().await;

    let indexed = fts::rebuild_index(&writer).await.unwrap();
    assert_eq!(indexed, 4);
    writer.close().await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    for (t, expected) in terms.iter().zip(&incremental) {
        assert_eq!(&ids(&engine, t).await, expected, "term {:?}", t);
    }
    engine.close().await;
}

// ─── Semantic ───────────────────────────────────────────────────────

fn embed_opts() -> EmbedOptions {
    EmbedOptions {
        batch_size: 2,
        page_size: 2,
        limit: None,
        dry_run: false,
    }
}

#[tokio::test]
async fn test_embed_pending_and_semantic_search() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    let dry = embed_pending(
        &writer,
        &HashEmbedder,
        &EmbedOptions {
            dry_run: true,
            ..embed_opts()
        },
    )
    .await
    .unwrap();
    assert_eq!(dry.pending, 3);
    assert_eq!(dry.embedded, 0);

    let report = embed_pending(&writer, &HashEmbedder, &embed_opts()).await.unwrap();
    assert_eq!(report.embedded, 3);
    assert_eq!(report.failed, 0);

    // Nothing changed, so a second pass never calls for new vectors.
    let again = embed_pending(&writer, &HashEmbedder, &embed_opts()).await.unwrap();
    assert_eq!(again.embedded, 0);
    writer.close().await;

    let engine = QueryEngine::open(&cfg)
        .await
        .unwrap()
        .with_embedder(Arc::new(HashEmbedder));
    let hits = engine
        .search_hits("hazelnut spreads", 3, false, SearchMode::Semantic)
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].record.record.id, NUTELLA_CODE);
    assert!(hits[0].score >= hits[1].score);

    let complete: Vec<String> = engine
        .search_hits("crackers", 10, true, SearchMode::Semantic)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.record.record.id)
        .collect();
    assert_eq!(complete.len(), 2);
    assert!(complete.contains(&NUTELLA_CODE.to_string()));
    assert!(complete.contains(&"7610400071680".to_string()));

    let hybrid = engine
        .search_hits("nutella", 2, false, SearchMode::Hybrid)
        .await
        .unwrap();
    assert_eq!(hybrid[0].record.record.id, NUTELLA_CODE);
    engine.close().await;
}

#[tokio::test]
async fn test_complete_only_semantic_sees_past_closer_incomplete_rows() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp);
    cfg.import.batch_size = 500;
    cfg.retrieval.candidate_k = 20;

    let mut lines: Vec<String> = (0..150).map(|i| numbered_product(i, "Crackers")).collect();
    lines.push(
        json!({
            "code": "9999999999999",
            "product_name": "Salted Wheat Crackers Deluxe Family Pack",
            "brands": "Bakehouse",
            "categories_tags": ["en:salty-snacks", "en:biscuits"],
            "nutriments": {
                "energy-kcal_100g": 480,
                "fat_100g": 20,
                "carbohydrates_100g": 65,
                "proteins_100g": 9
            },
            "completeness": 0.95,
            "last_modified_t": 1_600_000_000
        })
        .to_string(),
    );
    load(&cfg, &lines).await;

    let writer = CatalogWriter::open(&cfg).await.unwrap();
    let report = embed_pending(
        &writer,
        &HashEmbedder,
        &EmbedOptions {
            batch_size: 64,
            page_size: 64,
            limit: None,
            dry_run: false,
        },
    )
    .await
    .unwrap();
    assert_eq!(report.embedded, 151);
    writer.close().await;

    let engine = QueryEngine::open(&cfg)
        .await
        .unwrap()
        .with_embedder(Arc::new(HashEmbedder));

    let hit_ids = |hits: Vec<catalog_mirror_core::models::SearchHit>| -> Vec<String> {
        hits.into_iter().map(|h| h.record.record.id).collect()
    };
    let expected = vec!["9999999999999".to_string()];

    for mode in [SearchMode::Keyword, SearchMode::Semantic, SearchMode::Hybrid] {
        let hits = engine.search_hits("crackers", 5, true, mode).await.unwrap();
        assert_eq!(hit_ids(hits), expected, "mode {:?}", mode);
    }

    // Unfiltered, the incomplete rows still crowd the top of the vector channel.
    let unfiltered = engine
        .search_hits("crackers", 5, false, SearchMode::Semantic)
        .await
        .unwrap();
    assert_eq!(unfiltered.len(), 5);
    engine.close().await;
}

#[tokio::test]
async fn test_semantic_modes_degrade_without_embeddings() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp);
    load(&cfg, &base_dump()).await;

    let engine = QueryEngine::open(&cfg).await.unwrap();
    let semantic = engine
        .search_hits("nutella", 10, false, SearchMode::Semantic)
        .await
        .unwrap();
    assert!(semantic.is_empty());

    let hybrid: Vec<String> = engine
        .search_hits("crackers", 10, false, SearchMode::Hybrid)
        .await
        .unwrap()
        .into_iter()
        .map(|h| h.record.record.id)
        .collect();
    assert_eq!(hybrid, ids(&engine, "crackers").await);
    engine.close().await;
}

// ─── HTTP ───────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

#[tokio::test]
async fn test_http_endpoints() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let mut cfg = test_config(&tmp);
    cfg.server.bind = format!("127.0.0.1:{}", port);
    load(&cfg, &base_dump()).await;

    let cfg_clone = cfg.clone();
    let server_handle = tokio::spawn(async move {
        run_server(&cfg_clone).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let resp = client
        .get(format!("{}/products/{}", base, NUTELLA_CODE))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["name"], "Nutella");
    assert_eq!(body["complete_macros"], true);

    let resp = client
        .get(format!("{}/products/0000000000000", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .get(format!("{}/search?q=nutella&complete_only=true", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["record"]["id"], NUTELLA_CODE);

    let resp = client
        .get(format!("{}/search?q=qwxzvbnmplk", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["results"].as_array().unwrap().is_empty());

    for bad in ["limit=abc", "limit=0", "mode=fuzzy", "complete_only=maybe"] {
        let resp = client
            .get(format!("{}/search?q=nutella&{}", base, bad))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "query {}", bad);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    server_handle.abort();
}
