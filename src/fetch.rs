//! Where delta manifests and payloads come from.
//!
//! The synchronizer only needs two things from a source: the manifest text
//! and a way to materialize one named file on local disk. [`DeltaSource`]
//! captures exactly that, with an HTTP implementation for the public delta
//! directory and a directory implementation for local mirrors and tests.
//!
//! # Retry Strategy
//!
//! [`HttpDeltaSource`] retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::config::DeltaConfig;
use crate::error::CatalogError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[async_trait]
pub trait DeltaSource: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Fetch the manifest text.
    async fn manifest(&self) -> Result<String>;

    /// Fetch `file_name` into `dest`, replacing its contents.
    async fn fetch(&self, file_name: &str, dest: &Path) -> Result<()>;
}

/// Pick the configured source: a local mirror when `source_dir` is set,
/// HTTP otherwise.
pub fn create_delta_source(config: &DeltaConfig) -> Result<Box<dyn DeltaSource>> {
    match &config.source_dir {
        Some(dir) => Ok(Box::new(DirDeltaSource::new(dir, &config.manifest))),
        None => Ok(Box::new(HttpDeltaSource::new(config)?)),
    }
}

// ============ HTTP ============

pub struct HttpDeltaSource {
    client: reqwest::Client,
    base_url: String,
    manifest_name: String,
    max_retries: u32,
}

impl HttpDeltaSource {
    pub fn new(config: &DeltaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("catalog-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            manifest_name: config.manifest.clone(),
            max_retries: config.max_retries,
        })
    }

    fn url_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url, file_name)
    }

    /// GET with retry, returning the successful response.
    async fn get(&self, file_name: &str) -> Result<reqwest::Response> {
        let url = self.url_for(file_name);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%url, %status, attempt, "transient fetch failure");
                        last_err = Some(format!("HTTP {}", status));
                        continue;
                    }
                    return Err(CatalogError::transfer(&url, format!("HTTP {}", status)).into());
                }
                Err(e) => {
                    warn!(%url, error = %e, attempt, "fetch failed");
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(CatalogError::transfer(
            &url,
            last_err.unwrap_or_else(|| "failed after retries".to_string()),
        )
        .into())
    }
}

#[async_trait]
impl DeltaSource for HttpDeltaSource {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn manifest(&self) -> Result<String> {
        let response = self.get(&self.manifest_name).await?;
        let text = response
            .text()
            .await
            .map_err(|e| CatalogError::transfer(self.url_for(&self.manifest_name), e))?;
        Ok(text)
    }

    async fn fetch(&self, file_name: &str, dest: &Path) -> Result<()> {
        let url = self.url_for(file_name);
        let mut response = self.get(file_name).await?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CatalogError::transfer(&url, e))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

// ============ Local directory ============

/// A directory laid out like the public delta directory: a manifest file
/// plus the delta files it names.
pub struct DirDeltaSource {
    dir: PathBuf,
    manifest_name: String,
}

impl DirDeltaSource {
    pub fn new(dir: impl Into<PathBuf>, manifest_name: &str) -> Self {
        Self {
            dir: dir.into(),
            manifest_name: manifest_name.to_string(),
        }
    }
}

#[async_trait]
impl DeltaSource for DirDeltaSource {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    async fn manifest(&self) -> Result<String> {
        let path = self.dir.join(&self.manifest_name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CatalogError::transfer(path.display().to_string(), e).into())
    }

    async fn fetch(&self, file_name: &str, dest: &Path) -> Result<()> {
        let path = self.dir.join(file_name);
        tokio::fs::copy(&path, dest)
            .await
            .map_err(|e| CatalogError::transfer(path.display().to_string(), e))?;
        Ok(())
    }
}

// ============ Payload decoding ============

/// Open a dump or delta for line reading, transparently gunzipping when
/// the file starts with the gzip magic bytes.
pub fn open_payload(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|e| CatalogError::PayloadDecode {
        file: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut reader = BufReader::new(file);

    let is_gzip = reader
        .fill_buf()
        .map(|head| head.starts_with(&GZIP_MAGIC))
        .map_err(|e| CatalogError::PayloadDecode {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;

    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}
