//! # Catalog Mirror
//!
//! A local, searchable replica of a large public product catalog (Open
//! Food Facts style JSONL), kept current from published incremental deltas.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────────┐
//! │ Dump/Deltas │──▶│ Transformer │──▶│    SQLite       │
//! │ file / HTTP │   │ + batching  │   │ products + FTS5 │
//! └─────────────┘   └─────────────┘   │ + vectors       │
//!                                      └───────┬────────┘
//!                      ┌───────────────────────┤
//!                      ▼                       ▼
//!                 ┌──────────┐           ┌──────────┐
//!                 │   CLI    │           │   HTTP   │
//!                 │catmirror │           │  (axum)  │
//!                 └──────────┘           └──────────┘
//! ```
//!
//! Pure logic (record transformation, delta planning, query normalization,
//! score merging, vector math) lives in `catalog-mirror-core`. This crate
//! adds storage, fetching, and the outer surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed failure kinds |
//! | [`db`] | Write and read-only pools |
//! | [`schema`] | Tables, FTS5, triggers |
//! | [`store`] | Write handle: upserts, metadata, watermark |
//! | [`ingest`] | Line stream → batched upserts |
//! | [`bulk`] | Full destructive load |
//! | [`fetch`] | Delta sources and payload decoding |
//! | [`delta_sync`] | Watermark-driven delta application |
//! | [`fts`] | Lexical index rebuild and BM25 retrieval |
//! | [`embedding`] | Embedding providers |
//! | [`semantic`] | Vector storage and nearest-neighbour scan |
//! | [`query`] | Read-only query engine |
//! | [`server`] | HTTP API |

pub mod bulk;
pub mod config;
pub mod db;
pub mod delta_sync;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod fts;
pub mod get;
pub mod ingest;
pub mod query;
pub mod schema;
pub mod search;
pub mod semantic;
pub mod server;
pub mod stats;
pub mod store;
