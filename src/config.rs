//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults, so
//! the smallest working config is:
//!
//! ```toml
//! [db]
//! path = "./data/catalog.sqlite"
//! ```
//!
//! [`load_config`] parses and validates in one step; a config that loads is
//! safe to hand to any command.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Public Open Food Facts delta directory.
pub const DEFAULT_DELTA_URL: &str = "https://static.openfoodfacts.org/data/delta";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub delta: DeltaConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Size of the read-only pool used by the query engine.
    #[serde(default = "default_read_connections")]
    pub read_connections: u32,
}

fn default_read_connections() -> u32 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_import_batch_size")]
    pub batch_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_import_batch_size(),
        }
    }
}

fn default_import_batch_size() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeltaConfig {
    #[serde(default = "default_delta_url")]
    pub base_url: String,
    /// Local mirror of the delta directory. Takes precedence over `base_url`.
    #[serde(default)]
    pub source_dir: Option<PathBuf>,
    #[serde(default = "default_manifest")]
    pub manifest: String,
    #[serde(default = "default_delta_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_delta_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_delta_max_retries")]
    pub max_retries: u32,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            base_url: default_delta_url(),
            source_dir: None,
            manifest: default_manifest(),
            batch_size: default_delta_batch_size(),
            timeout_secs: default_delta_timeout_secs(),
            max_retries: default_delta_max_retries(),
        }
    }
}

fn default_delta_url() -> String {
    DEFAULT_DELTA_URL.to_string()
}
fn default_manifest() -> String {
    "index.txt".to_string()
}
fn default_delta_batch_size() -> usize {
    1000
}
fn default_delta_timeout_secs() -> u64 {
    300
}
fn default_delta_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// FTS5 tokenizer definition, e.g. `unicode61 remove_diacritics 2` or `porter unicode61`.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            tokenizer: default_tokenizer(),
        }
    }
}

fn default_tokenizer() -> String {
    "unicode61 remove_diacritics 2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// Candidates fetched per channel before hybrid merging.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_limit() -> i64 {
    20
}
fn default_hybrid_alpha() -> f64 {
    0.5
}
fn default_candidate_k() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Texts per embedding call.
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    /// Rows scanned per keyset page by `embed pending`.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_embed_batch_size(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_batch_size() -> usize {
    128
}
fn default_page_size() -> usize {
    25_000
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.read_connections == 0 {
        anyhow::bail!("db.read_connections must be > 0");
    }

    if config.import.batch_size == 0 {
        anyhow::bail!("import.batch_size must be > 0");
    }
    if config.delta.batch_size == 0 {
        anyhow::bail!("delta.batch_size must be > 0");
    }
    if config.delta.manifest.trim().is_empty() {
        anyhow::bail!("delta.manifest must not be empty");
    }

    // The tokenizer definition is spliced into CREATE VIRTUAL TABLE.
    let tokenizer = config.index.tokenizer.trim();
    if tokenizer.is_empty()
        || !tokenizer
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
    {
        anyhow::bail!(
            "index.tokenizer may only contain letters, digits, '_' and spaces, got '{}'",
            config.index.tokenizer
        );
    }

    if config.retrieval.default_limit < 1 {
        anyhow::bail!("retrieval.default_limit must be >= 1");
    }
    if config.retrieval.candidate_k < 1 {
        anyhow::bail!("retrieval.candidate_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    let embedding = &config.embedding;
    if embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if embedding.page_size == 0 {
        anyhow::bail!("embedding.page_size must be > 0");
    }
    if embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match embedding.provider.as_str() {
        "disabled" | "local" => {}
        "ollama" => {
            if embedding.model.is_none() || embedding.dims.is_none() {
                anyhow::bail!("embedding.model and embedding.dims must be specified when provider is 'ollama'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, or ollama.",
            other
        ),
    }

    Ok(())
}

impl Config {
    /// Defaults for everything, with the store at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                read_connections: default_read_connections(),
            },
            import: ImportConfig::default(),
            delta: DeltaConfig::default(),
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}
