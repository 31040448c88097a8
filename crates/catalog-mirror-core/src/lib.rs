//! # catalog-mirror core
//!
//! Pure logic shared by the catalog-mirror store, loaders, and query
//! engine: the [`models::Record`] shape, the line [`transform`]er, delta
//! file planning ([`delta`]), lexical query normalization ([`query`]),
//! hybrid score merging ([`search`]), and the [`embedding::Embedder`] trait
//! with vector helpers.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Everything here
//! is deterministic and unit-tested in place.

pub mod delta;
pub mod embedding;
pub mod models;
pub mod query;
pub mod search;
pub mod transform;
