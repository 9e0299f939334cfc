//! Error taxonomy for the overlay filesystem index.

use thiserror::Error;

/// Errors produced by the path trie, codec, overlay join and streaming
/// indexer. Every variant is distinguishable so callers can react without
/// string matching.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("image index not ready: {0}")]
    NotReady(String),

    #[error("unsupported index codec version: {0}")]
    UnsupportedVersion(u32),

    #[error("malformed index payload: {0}")]
    MalformedPayload(String),

    #[error("index payload truncated")]
    Truncated,

    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("image already being prepared: {0}")]
    AlreadyAcquired(String),

    #[error("image already present: {0}")]
    AlreadyPresent(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
