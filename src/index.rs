//! Per-layer and cumulative-image index: a path trie plus the whiteout
//! bookkeeping the overlay join needs. The same type serves both roles —
//! a freshly built layer index and the running merged image index have
//! identical shape, only how they were produced differs.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use rayon::prelude::*;

use crate::attrs::FileAttributes;
use crate::codec;
use crate::error::IndexError;
use crate::node::NodeRecord;
use crate::path;
use crate::trie::PathTrie;

/// A whiteout marker's basename is exactly this (OCI opaque-directory
/// convention): the directory containing it is emptied on join, but the
/// directory itself stays.
const OPAQUE_MARKER: &str = ".wh..wh.opq";
const WHITEOUT_PREFIX: &str = ".wh.";

#[derive(Clone)]
pub struct Index {
    pub trie: PathTrie,
    pub whiteout_files: BTreeSet<String>,
    pub opaque_dirs: BTreeSet<String>,
    pub is_complete: bool,
    /// Layer position -> layer digest, for resolving `open()` against the
    /// originating layer's extracted content. Populated by the streaming
    /// indexer as messages arrive; never carried by the wire codec.
    pub layer_digests: BTreeMap<u8, String>,
}

impl Index {
    pub fn empty() -> Self {
        Self {
            trie: PathTrie::new(),
            whiteout_files: BTreeSet::new(),
            opaque_dirs: BTreeSet::new(),
            is_complete: false,
            layer_digests: BTreeMap::new(),
        }
    }

    /// Classifies every entry already in `trie` into the whiteout/opaque
    /// bookkeeping sets. Shared by the layer builder (fresh walk) and by
    /// [`Index::from_bytes`] (reconstituted from the wire codec, which
    /// doesn't carry these sets directly).
    pub fn from_trie(trie: PathTrie, is_complete: bool) -> Self {
        let mut whiteout_files = BTreeSet::new();
        let mut opaque_dirs = BTreeSet::new();
        trie.for_each(|rec| {
            let basename = path::basename(&rec.path);
            if basename.contains(WHITEOUT_PREFIX) {
                whiteout_files.insert(rec.path.clone());
            }
            if basename == OPAQUE_MARKER {
                opaque_dirs.insert(rec.path.clone());
            }
        });
        Self {
            trie,
            whiteout_files,
            opaque_dirs,
            is_complete,
            layer_digests: BTreeMap::new(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        codec::serialize(&self.trie)
    }

    pub fn from_bytes(bytes: &[u8], is_complete: bool) -> Result<Self, IndexError> {
        let trie = codec::deserialize(bytes)?;
        Ok(Self::from_trie(trie, is_complete))
    }

    /// Walks `root` and builds a fresh layer index from it. `root` is the
    /// already-extracted contents of one OCI layer; the root directory
    /// itself is not inserted, matching a layer's contribution being
    /// everything *under* it.
    pub fn build_from_layer_root(root: &Path) -> Result<Self, IndexError> {
        let mut trie = PathTrie::new();
        for entry in walk(root, root)? {
            trie.insert(&entry.path.clone(), entry.into_record());
        }
        Ok(Self::from_trie(trie, false))
    }
}

struct WalkEntry {
    path: String,
    attributes: FileAttributes,
    symlink_target: Option<String>,
}

impl WalkEntry {
    fn into_record(self) -> NodeRecord {
        NodeRecord {
            path: self.path,
            attributes: self.attributes,
            layer_position: 0,
            symlink_target: self.symlink_target,
        }
    }
}

fn to_index_path(root: &Path, full: &Path) -> String {
    let rel = full.strip_prefix(root).unwrap_or(full);
    path::normalize(&rel.to_string_lossy())
}

/// Parallel recursive directory walk. Any failure to stat or read an entry
/// aborts the whole build — partial indices are never returned.
fn walk(root: &Path, dir: &Path) -> std::io::Result<Vec<WalkEntry>> {
    let entries: Vec<fs::DirEntry> = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;

    entries
        .into_par_iter()
        .map(|entry| -> std::io::Result<Vec<WalkEntry>> {
            let full = entry.path();
            let meta = fs::symlink_metadata(&full)?;
            let index_path = to_index_path(root, &full);

            let symlink_target = if meta.file_type().is_symlink() {
                // Relative targets are normalized the same way absolute
                // ones are, so a link to "../lib/foo" ends up as
                // "/lib/foo". That matches how this system has always
                // resolved symlink targets; it is not general symlink
                // resolution.
                let target = fs::read_link(&full)?;
                Some(path::normalize(&target.to_string_lossy()))
            } else {
                None
            };

            let mut out = vec![WalkEntry {
                path: index_path,
                attributes: FileAttributes::from_metadata(&meta),
                symlink_target,
            }];

            if meta.file_type().is_dir() {
                out.extend(walk(root, &full)?);
            }

            Ok(out)
        })
        .collect::<std::io::Result<Vec<Vec<WalkEntry>>>>()
        .map(|nested| nested.into_iter().flatten().collect())
}
