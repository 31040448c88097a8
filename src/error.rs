//! Failure kinds callers need to tell apart.
//!
//! Most fallible functions return `anyhow::Result`. When the kind of a
//! failure matters to the caller (the HTTP layer choosing a status code, a
//! sync run deciding whether it was a transfer problem), the error is raised
//! as a [`CatalogError`] and recovered with `downcast_ref`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The store file is missing, unreadable, or lacks the expected schema.
    /// Never repaired automatically.
    #[error("store unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    /// A manifest or delta could not be fetched.
    #[error("failed to fetch {what}: {reason}")]
    Transfer { what: String, reason: String },

    /// A fetched payload could not be read as a line stream.
    #[error("failed to read payload {file}: {reason}")]
    PayloadDecode { file: String, reason: String },

    /// A caller-supplied parameter is outside its contract.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl CatalogError {
    pub fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transfer(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transfer {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}
