//! Read-only, on-demand filesystem view over container image layers.
//!
//! This crate is the core described in the system's specification: it
//! never fetches a registry, extracts a tar, or talks to a database. It
//! consumes an already-extracted layer directory (via
//! [`collaborators::LayerStore`]) and a place to persist the merged index
//! (via [`collaborators::Persistence`]), and exposes:
//!
//! - [`trie::PathTrie`] — the prefix-searchable path index.
//! - [`join::join`] — the OCI whiteout-aware overlay merge.
//! - [`indexer::spawn_image_indexer`] — the streaming per-image merge task.
//! - [`facade::LookupFacade`] — the wait-tolerant query surface RPC/FUSE
//!   glue calls directly.

pub mod arena;
pub mod attrs;
pub mod cache;
pub mod codec;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod facade;
pub mod index;
pub mod indexer;
pub mod join;
pub mod node;
pub mod path;
pub mod trie;

// Re-export main types
pub use cache::{ImageCache, LayerCache, PendingImages};
pub use collaborators::{LayerStore, Persistence};
pub use config::IndexerConfig;
pub use error::{IndexError, Result};
pub use facade::LookupFacade;
pub use index::Index;
pub use indexer::{spawn_image_indexer, LayerMessage};
pub use node::NodeRecord;
