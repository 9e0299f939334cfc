//! The record stored at each occupied path in the trie.

use crate::attrs::{FileAttributes, FileKind};
use crate::path;

/// A single filesystem entry as seen by one layer, or as merged into a
/// cumulative image index.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub path: String,
    pub attributes: FileAttributes,
    /// Index of the layer (0 = bottom of the stack) that currently owns
    /// this entry. Rewritten in place by the overlay join.
    pub layer_position: u8,
    pub symlink_target: Option<String>,
}

impl NodeRecord {
    pub fn basename(&self) -> &str {
        path::basename(&self.path)
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.attributes.mode)
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == FileKind::Symlink
    }
}
