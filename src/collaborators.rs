//! Interfaces this crate consumes (§6): a layer store that extracts layers
//! onto local storage, and a persistence backend that stores the final
//! serialized image index. Both are owned and implemented elsewhere (the
//! registry/extraction pipeline, the metadata database); this crate only
//! ever calls them.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::IndexError;

/// Given a layer digest, yields the directory holding that layer's already
/// extracted contents. This crate reads from it and never writes.
#[async_trait]
pub trait LayerStore: Send + Sync {
    async fn layer_root(&self, layer_digest: &str) -> Result<PathBuf, IndexError>;
}

/// Stores and retrieves a complete image index's serialized bytes.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn put_index(&self, image_digest: &str, bytes: Vec<u8>) -> Result<(), IndexError>;
    async fn get_index(&self, image_digest: &str) -> Result<Option<Vec<u8>>, IndexError>;
}
