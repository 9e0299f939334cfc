//! Overlay join: fold one layer's index underneath the running image index,
//! honoring OCI whiteout and opaque-directory semantics.

use crate::index::Index;
use crate::path;

const OPAQUE_MARKER: &str = ".wh..wh.opq";
const WHITEOUT_PREFIX: &str = ".wh.";

/// Merges `upper` on top of `lower`, mutating `lower` in place so it becomes
/// the merged result.
///
/// `lower_layer_position` is the stack position of `lower` (the layer that
/// is, by construction, beneath everything folded into `upper` so far).
/// `first_join` must be true exactly once per image: the first time an
/// already-adopted top layer (`upper`) is folded against the next layer
/// down. On that call every node `upper` contributes is stamped with
/// `lower_layer_position + 1`; on every later call `upper`'s nodes already
/// carry a correct label from an earlier join and are copied as-is.
pub fn join(lower: &mut Index, upper: &Index, lower_layer_position: u8, first_join: bool) {
    // 1. Relabel lower unconditionally.
    lower
        .trie
        .for_each_mut(|rec| rec.layer_position = lower_layer_position);
    let upper_position = lower_layer_position.saturating_add(1);

    // 2. Whiteout files: delete the real path (and, by detachment, its
    // subtree) from lower. The opaque marker itself is excluded even
    // though it may also appear in `whiteout_files`.
    for wpath in &upper.whiteout_files {
        let basename = path::basename(wpath);
        if basename == OPAQUE_MARKER {
            continue;
        }
        let Some(real_base) = basename.strip_prefix(WHITEOUT_PREFIX) else {
            continue;
        };
        let dir = path::parent(wpath);
        let real = path::join(dir, real_base);
        lower.trie.delete(&real);
    }

    // 3. Opaque directories: clear lower's contents under the marked
    // directory, but never the directory entry itself. A marker sitting at
    // the pseudo-root has no directory to empty and is skipped.
    for mpath in &upper.opaque_dirs {
        let opaque_dir = path::parent(mpath);
        if opaque_dir == "/" {
            continue;
        }
        lower.trie.clear_subtree_contents(opaque_dir);
    }

    // 4. Overlay upper's non-whiteout entries last, so an add that follows
    // a whiteout of the same path wins.
    let mut additions = Vec::new();
    upper.trie.for_each(|rec| {
        if path::basename(&rec.path).starts_with(WHITEOUT_PREFIX) {
            return;
        }
        let mut cloned = rec.clone();
        if first_join {
            cloned.layer_position = upper_position;
        }
        additions.push(cloned);
    });
    for rec in additions {
        lower.trie.insert(&rec.path.clone(), rec);
    }

    // Carry forward provenance for the open()/read() surface: every layer
    // digest known to either side survives the merge. The indexer is
    // responsible for recording `lower`'s own digest before calling this.
    for (position, digest) in &upper.layer_digests {
        lower.layer_digests.insert(*position, digest.clone());
    }
}
