use std::path::PathBuf;

use thiserror::Error;

use crate::fingerprint::ContentHash;

#[derive(Error, Debug)]
pub enum WardenError {
    /// The bytes are not a usable raster image. The content hash is still
    /// known, so exact-content lookups can proceed.
    #[error("Decode error for {content_hash}: {reason}")]
    Decode {
        content_hash: ContentHash,
        reason: String,
    },

    #[error("Fingerprint extraction timed out after {0} ms")]
    ExtractTimeout(u64),

    #[error("Store I/O error at {}: {reason}", .path.display())]
    StoreIo { path: PathBuf, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Reconciliation corpus is empty: {0}")]
    CorpusEmpty(&'static str),

    #[error("Reconciliation already in progress")]
    ReconcileInProgress,

    #[error("Moderation sink error: {0}")]
    Sink(String),
}

impl WardenError {
    pub(crate) fn store_io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::StoreIo {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Errors that only affect a single attachment and never abort an event.
    pub fn is_attachment_local(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::ExtractTimeout(_))
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
