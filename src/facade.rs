//! Lookup facade (§4.7): the interface RPC/FUSE glue calls directly. Wraps
//! the image cache with wait-and-retry tolerance for in-progress merges,
//! and backs the `open`/`read`/`release` surface named in §6 by resolving
//! a node's layer provenance through the injected [`LayerStore`].

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::ImageCache;
use crate::collaborators::{LayerStore, Persistence};
use crate::config::IndexerConfig;
use crate::error::IndexError;
use crate::index::Index;
use crate::node::NodeRecord;
use crate::path;

/// POSIX flags that imply a write. `open()` rejects any combination that
/// includes one of these, per the non-goal that this system never writes.
const WRITE_FLAG_MASK: u32 =
    (libc::O_WRONLY | libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC | libc::O_APPEND | libc::O_EXCL) as u32;

enum Probe<T> {
    Ready(T),
    NotFoundComplete,
    Pending,
}

pub struct LookupFacade {
    image_cache: Arc<ImageCache>,
    persistence: Arc<dyn Persistence>,
    layer_store: Arc<dyn LayerStore>,
    config: IndexerConfig,
    handles: DashMap<Uuid, std::fs::File>,
}

impl LookupFacade {
    pub fn new(
        image_cache: Arc<ImageCache>,
        persistence: Arc<dyn Persistence>,
        layer_store: Arc<dyn LayerStore>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            image_cache,
            persistence,
            layer_store,
            config,
            handles: DashMap::new(),
        }
    }

    /// True if an image index is already in memory, or could be rehydrated
    /// from persistent storage (a successful rehydrate is a side effect:
    /// the index is published under `image_digest` for subsequent calls).
    pub async fn ready(&self, image_digest: &str) -> bool {
        if self.image_cache.contains_ready(image_digest) {
            return true;
        }

        match self.persistence.get_index(image_digest).await {
            Ok(Some(bytes)) => match Index::from_bytes(&bytes, true) {
                Ok(idx) => {
                    let slot = self.image_cache.slot(image_digest);
                    *slot.write() = Some(idx);
                    true
                }
                Err(err) => {
                    log::warn!("failed to rehydrate persisted index for {image_digest}: {err}");
                    false
                }
            },
            Ok(None) => false,
            Err(err) => {
                log::warn!("persistence lookup failed for {image_digest}: {err}");
                false
            }
        }
    }

    /// Resolves `path` against `image_digest`'s index, waiting in
    /// [`IndexerConfig::lookup_retry_interval`] increments while the index
    /// is present but not yet complete and doesn't (yet) contain the path.
    pub async fn lookup(
        &self,
        ctx: &CancellationToken,
        image_digest: &str,
        path: &str,
    ) -> Result<NodeRecord, IndexError> {
        loop {
            if ctx.is_cancelled() {
                return Err(cancelled(image_digest));
            }

            let slot = self.image_cache.slot(image_digest);
            let probe = {
                let guard = slot.read();
                match guard.as_ref() {
                    None => None,
                    Some(idx) => Some(match idx.trie.lookup(path) {
                        Some(node) => Probe::Ready(node.clone()),
                        None if idx.is_complete => Probe::NotFoundComplete,
                        None => Probe::Pending,
                    }),
                }
            };

            match probe {
                Some(Probe::Ready(node)) => return Ok(node),
                Some(Probe::NotFoundComplete) => return Err(IndexError::NotFound(path.to_string())),
                Some(Probe::Pending) => {}
                None => {
                    if !self.ready(image_digest).await {
                        return Err(IndexError::NotReady(image_digest.to_string()));
                    }
                    continue;
                }
            }

            self.wait_for_retry(ctx).await?;
        }
    }

    /// Direct children of `dir`, with the same wait-and-retry tolerance as
    /// [`Self::lookup`]. The root is special-cased: it has no node record
    /// of its own (the layer builder never inserts one), so its children
    /// are returned as soon as an index exists, even a partial one.
    pub async fn lookup_by_prefix(
        &self,
        ctx: &CancellationToken,
        image_digest: &str,
        dir: &str,
    ) -> Result<Vec<NodeRecord>, IndexError> {
        let normalized = path::normalize(dir);
        loop {
            if ctx.is_cancelled() {
                return Err(cancelled(image_digest));
            }

            let slot = self.image_cache.slot(image_digest);
            let probe = {
                let guard = slot.read();
                match guard.as_ref() {
                    None => None,
                    Some(idx) => Some(if normalized == "/" {
                        Probe::Ready(children(idx, &normalized))
                    } else {
                        match idx.trie.lookup(&normalized) {
                            Some(_) => Probe::Ready(children(idx, &normalized)),
                            None if idx.is_complete => Probe::NotFoundComplete,
                            None => Probe::Pending,
                        }
                    }),
                }
            };

            match probe {
                Some(Probe::Ready(nodes)) => return Ok(nodes),
                Some(Probe::NotFoundComplete) => {
                    return Err(IndexError::NotFound(normalized));
                }
                Some(Probe::Pending) => {}
                None => {
                    if !self.ready(image_digest).await {
                        return Err(IndexError::NotReady(image_digest.to_string()));
                    }
                    continue;
                }
            }

            self.wait_for_retry(ctx).await?;
        }
    }

    /// Opens a read-only handle onto the layer that currently owns `path`.
    /// `flags` is accepted for interface parity with the exposed contract;
    /// anything implying a write is rejected (no writes is a non-goal).
    pub async fn open(
        &self,
        ctx: &CancellationToken,
        image_digest: &str,
        path: &str,
        flags: u32,
    ) -> Result<Uuid, IndexError> {
        if flags & WRITE_FLAG_MASK != 0 {
            return Err(IndexError::IoFailure(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "this filesystem is read-only",
            )));
        }

        let node = self.lookup(ctx, image_digest, path).await?;

        let layer_digest = {
            let slot = self.image_cache.slot(image_digest);
            let guard = slot.read();
            let idx = guard
                .as_ref()
                .ok_or_else(|| IndexError::NotReady(image_digest.to_string()))?;
            idx.layer_digests
                .get(&node.layer_position)
                .cloned()
                .ok_or_else(|| IndexError::NotFound(path.to_string()))?
        };

        let root = self.layer_store.layer_root(&layer_digest).await?;
        let relative = node.path.trim_start_matches('/');
        let file = std::fs::File::open(root.join(relative))?;

        let handle = Uuid::new_v4();
        self.handles.insert(handle, file);
        Ok(handle)
    }

    /// Positional read against an open handle; does not move a cursor, so
    /// concurrent reads at different offsets on the same handle are safe.
    pub fn read(&self, handle: Uuid, offset: i64, size: u32) -> Result<Vec<u8>, IndexError> {
        use std::os::unix::fs::FileExt;

        let entry = self
            .handles
            .get(&handle)
            .ok_or_else(|| IndexError::NotFound(handle.to_string()))?;
        let mut buf = vec![0u8; size as usize];
        let n = entry.read_at(&mut buf, offset as u64)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn release(&self, handle: Uuid) -> Result<(), IndexError> {
        self.handles
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| IndexError::NotFound(handle.to_string()))
    }

    async fn wait_for_retry(&self, ctx: &CancellationToken) -> Result<(), IndexError> {
        tokio::select! {
            _ = ctx.cancelled() => Err(cancelled("lookup")),
            _ = tokio::time::sleep(self.config.lookup_retry_interval) => Ok(()),
        }
    }
}

fn children(idx: &Index, dir: &str) -> Vec<NodeRecord> {
    idx.trie.direct_children(dir).into_iter().cloned().collect()
}

fn cancelled(image_digest: &str) -> IndexError {
    IndexError::NotReady(format!("lookup cancelled before resolving {image_digest}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::FileAttributes;
    use crate::collaborators::fakes::{FakeLayerStore, FakePersistence};
    use crate::trie::PathTrie;
    use std::collections::{BTreeMap, BTreeSet};
    use std::time::Duration;
    use tempfile::TempDir;

    fn facade() -> (LookupFacade, Arc<ImageCache>, Arc<FakeLayerStore>, Arc<FakePersistence>) {
        let image_cache = Arc::new(ImageCache::new());
        let layer_store = Arc::new(FakeLayerStore::new());
        let persistence = Arc::new(FakePersistence::new());
        let facade = LookupFacade::new(
            Arc::clone(&image_cache),
            Arc::clone(&persistence) as Arc<dyn Persistence>,
            Arc::clone(&layer_store) as Arc<dyn LayerStore>,
            IndexerConfig {
                channel_capacity: 16,
                lookup_retry_interval: Duration::from_millis(5),
            },
        );
        (facade, image_cache, layer_store, persistence)
    }

    fn file_record(path: &str, layer_position: u8) -> NodeRecord {
        NodeRecord {
            path: path.to_string(),
            attributes: FileAttributes {
                mode: libc::S_IFREG as u32 | 0o644,
                ..Default::default()
            },
            layer_position,
            symlink_target: None,
        }
    }

    fn dir_record(path: &str) -> NodeRecord {
        NodeRecord {
            path: path.to_string(),
            attributes: FileAttributes {
                mode: libc::S_IFDIR as u32 | 0o755,
                ..Default::default()
            },
            layer_position: 0,
            symlink_target: None,
        }
    }

    #[tokio::test]
    async fn lookup_returns_not_found_once_complete() {
        let (facade, image_cache, _layer_store, _persistence) = facade();
        let mut trie = PathTrie::new();
        trie.insert("/a", file_record("/a", 0));
        let idx = Index {
            trie,
            whiteout_files: BTreeSet::new(),
            opaque_dirs: BTreeSet::new(),
            is_complete: true,
            layer_digests: BTreeMap::new(),
        };
        *image_cache.slot("img").write() = Some(idx);

        let ctx = CancellationToken::new();
        assert!(facade.lookup(&ctx, "img", "/a").await.is_ok());
        assert!(matches!(
            facade.lookup(&ctx, "img", "/missing").await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lookup_waits_then_finds_a_path_that_arrives_later() {
        let (facade, image_cache, _layer_store, _persistence) = facade();
        let mut trie = PathTrie::new();
        trie.insert("/a", file_record("/a", 0));
        let idx = Index {
            trie,
            whiteout_files: BTreeSet::new(),
            opaque_dirs: BTreeSet::new(),
            is_complete: false,
            layer_digests: BTreeMap::new(),
        };
        *image_cache.slot("img").write() = Some(idx);

        let slot = image_cache.slot("img");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            if let Some(idx) = slot.write().as_mut() {
                idx.trie.insert("/b", file_record("/b", 1));
            }
        });

        let ctx = CancellationToken::new();
        let node = facade
            .lookup(&ctx, "img", "/b")
            .await
            .expect("eventually found");
        assert_eq!(node.path, "/b");
    }

    #[tokio::test]
    async fn lookup_honors_cancellation() {
        let (facade, image_cache, _layer_store, _persistence) = facade();
        let idx = Index {
            trie: PathTrie::new(),
            whiteout_files: BTreeSet::new(),
            opaque_dirs: BTreeSet::new(),
            is_complete: false,
            layer_digests: BTreeMap::new(),
        };
        *image_cache.slot("img").write() = Some(idx);

        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(matches!(
            facade.lookup(&ctx, "img", "/never").await,
            Err(IndexError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn lookup_by_prefix_returns_direct_children_only() {
        let (facade, image_cache, _layer_store, _persistence) = facade();
        let mut trie = PathTrie::new();
        trie.insert("/a", dir_record("/a"));
        trie.insert("/a/b.txt", file_record("/a/b.txt", 0));
        trie.insert("/a/c/d.txt", file_record("/a/c/d.txt", 0));
        let idx = Index {
            trie,
            whiteout_files: BTreeSet::new(),
            opaque_dirs: BTreeSet::new(),
            is_complete: true,
            layer_digests: BTreeMap::new(),
        };
        *image_cache.slot("img").write() = Some(idx);

        let ctx = CancellationToken::new();
        let mut names: Vec<_> = facade
            .lookup_by_prefix(&ctx, "img", "/a")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.basename().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["b.txt".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn lookup_by_prefix_on_root_returns_partial_immediately() {
        let (facade, image_cache, _layer_store, _persistence) = facade();
        let mut trie = PathTrie::new();
        trie.insert("/a.txt", file_record("/a.txt", 0));
        let idx = Index {
            trie,
            whiteout_files: BTreeSet::new(),
            opaque_dirs: BTreeSet::new(),
            is_complete: false,
            layer_digests: BTreeMap::new(),
        };
        *image_cache.slot("img").write() = Some(idx);

        let ctx = CancellationToken::new();
        let names: Vec<_> = facade
            .lookup_by_prefix(&ctx, "img", "/")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.basename().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn open_read_release_roundtrip_through_the_layer_store() {
        let (facade, image_cache, layer_store, _persistence) = facade();

        let layer_dir = TempDir::new().unwrap();
        std::fs::write(layer_dir.path().join("hello.txt"), b"hello world").unwrap();
        layer_store.register("sha256:layer0", layer_dir.path().to_path_buf());

        let mut trie = PathTrie::new();
        trie.insert("/hello.txt", file_record("/hello.txt", 0));
        let mut layer_digests = BTreeMap::new();
        layer_digests.insert(0u8, "sha256:layer0".to_string());
        let idx = Index {
            trie,
            whiteout_files: BTreeSet::new(),
            opaque_dirs: BTreeSet::new(),
            is_complete: true,
            layer_digests,
        };
        *image_cache.slot("img").write() = Some(idx);

        let ctx = CancellationToken::new();
        let handle = facade
            .open(&ctx, "img", "/hello.txt", libc::O_RDONLY as u32)
            .await
            .expect("open succeeds");

        let bytes = facade.read(handle, 6, 5).expect("read succeeds");
        assert_eq!(bytes, b"world");

        facade.release(handle).expect("release succeeds");
        assert!(matches!(
            facade.read(handle, 0, 1),
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn open_rejects_write_flags() {
        let (facade, _image_cache, _layer_store, _persistence) = facade();
        let ctx = CancellationToken::new();
        let result = facade
            .open(&ctx, "img", "/x", libc::O_WRONLY as u32)
            .await;
        assert!(matches!(result, Err(IndexError::IoFailure(_))));
    }

    #[tokio::test]
    async fn ready_rehydrates_from_persistence() {
        let (facade, image_cache, _layer_store, persistence) = facade();
        let mut trie = PathTrie::new();
        trie.insert("/a", file_record("/a", 0));
        let idx = Index {
            trie,
            whiteout_files: BTreeSet::new(),
            opaque_dirs: BTreeSet::new(),
            is_complete: true,
            layer_digests: BTreeMap::new(),
        };
        let bytes = idx.serialize();
        persistence.put_index("img", bytes).await.unwrap();

        assert!(!image_cache.contains_ready("img"));
        assert!(facade.ready("img").await);
        assert!(image_cache.contains_ready("img"));
    }
}
