//! Error types for the profile store.

use crate::types::RecordId;
use thiserror::Error;

/// Main error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Record has no id")]
    MissingId,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Blob upload failed: {0}")]
    BlobUpload(String),

    #[error("Asset fetch failed: {0}")]
    AssetFetch(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
