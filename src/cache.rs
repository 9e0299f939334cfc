//! Concurrent caches shared across images and layers.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;

use crate::index::Index;

/// Layer indices are written once (the first time a digest is seen) and
/// read-mostly afterward. Never mutate a cached entry directly — clone it
/// into a private working copy before folding it into an image.
#[derive(Default)]
pub struct LayerCache {
    inner: DashMap<String, Arc<Index>>,
}

impl LayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, layer_digest: &str) -> Option<Arc<Index>> {
        self.inner.get(layer_digest).map(|e| Arc::clone(&e))
    }

    pub fn insert(&self, layer_digest: String, index: Index) -> Arc<Index> {
        let arc = Arc::new(index);
        self.inner.insert(layer_digest, Arc::clone(&arc));
        arc
    }
}

/// Each image's cumulative index lives behind its own lock, held only for
/// the duration of a single join or adoption, per the single-writer model:
/// exactly one indexer task ever writes to a given image's slot.
#[derive(Default)]
pub struct ImageCache {
    inner: DashMap<String, Arc<RwLock<Option<Index>>>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, image_digest: &str) -> Arc<RwLock<Option<Index>>> {
        Arc::clone(
            self.inner
                .entry(image_digest.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(None))),
        )
    }

    pub fn contains_ready(&self, image_digest: &str) -> bool {
        self.inner
            .get(image_digest)
            .map(|slot| slot.read().is_some())
            .unwrap_or(false)
    }
}

/// Deduplicates concurrent `prepare_image` calls for the same digest.
#[derive(Default)]
pub struct PendingImages {
    inner: DashSet<String>,
}

impl PendingImages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call acquired the slot (the caller should
    /// proceed); false if another task already holds it.
    pub fn acquire(&self, image_digest: &str) -> bool {
        self.inner.insert(image_digest.to_string())
    }

    pub fn release(&self, image_digest: &str) {
        self.inner.remove(image_digest);
    }
}
