//! Versioned wire format: `zlib(best_compression, protobuf(FSIndex))`.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use prost::Message;

use crate::attrs::FileAttributes;
use crate::error::IndexError;
use crate::node::NodeRecord;
use crate::trie::PathTrie;

mod pb {
    include!(concat!(env!("OUT_DIR"), "/fsoverlay.rs"));
}

const CURRENT_VERSION: u32 = 1;

fn to_pb_attributes(a: &FileAttributes) -> pb::FileAttributes {
    pb::FileAttributes {
        inode: a.inode,
        size: a.size,
        blocks: a.blocks,
        mode: a.mode,
        nlink: a.nlink,
        uid: a.uid,
        gid: a.gid,
        rdev: a.rdev,
        blksize: a.blksize,
        atime: a.atime,
        atimensec: a.atimensec,
        mtime: a.mtime,
        mtimensec: a.mtimensec,
        ctime: a.ctime,
        ctimensec: a.ctimensec,
    }
}

fn from_pb_attributes(a: &pb::FileAttributes) -> FileAttributes {
    FileAttributes {
        inode: a.inode,
        size: a.size,
        blocks: a.blocks,
        mode: a.mode,
        nlink: a.nlink,
        uid: a.uid,
        gid: a.gid,
        rdev: a.rdev,
        blksize: a.blksize,
        atime: a.atime,
        atimensec: a.atimensec,
        mtime: a.mtime,
        mtimensec: a.mtimensec,
        ctime: a.ctime,
        ctimensec: a.ctimensec,
    }
}

/// Enumerates every node in `trie` and writes it as a zlib-compressed,
/// version-tagged protobuf payload.
pub fn serialize(trie: &PathTrie) -> Vec<u8> {
    let mut paths = Vec::new();
    trie.for_each(|rec| {
        paths.push(pb::FsIndexNode {
            path: rec.path.clone(),
            attributes: Some(to_pb_attributes(&rec.attributes)),
            layer_position: rec.layer_position as u32,
            symlink_target: rec.symlink_target.clone(),
        });
    });

    let index = pb::FsIndex {
        version: CURRENT_VERSION,
        paths,
    };

    let mut encoded = Vec::with_capacity(index.encoded_len());
    index
        .encode(&mut encoded)
        .expect("encoding into a Vec<u8> cannot fail");

    let mut zlib = ZlibEncoder::new(Vec::new(), Compression::best());
    zlib.write_all(&encoded)
        .expect("writing into a Vec<u8> cannot fail");
    zlib.finish().expect("finishing into a Vec<u8> cannot fail")
}

/// Reverses [`serialize`], rejecting payloads with a version other than the
/// one this binary understands.
pub fn deserialize(bytes: &[u8]) -> Result<PathTrie, IndexError> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            IndexError::Truncated
        } else {
            IndexError::MalformedPayload(e.to_string())
        }
    })?;

    let index =
        pb::FsIndex::decode(decoded.as_slice()).map_err(|e| IndexError::MalformedPayload(e.to_string()))?;

    if index.version != CURRENT_VERSION {
        return Err(IndexError::UnsupportedVersion(index.version));
    }

    let mut trie = PathTrie::new();
    for node in index.paths {
        let attributes = node
            .attributes
            .as_ref()
            .map(from_pb_attributes)
            .unwrap_or_default();
        trie.insert(
            &node.path.clone(),
            NodeRecord {
                path: node.path,
                attributes,
                layer_position: node.layer_position as u8,
                symlink_target: node.symlink_target,
            },
        );
    }
    Ok(trie)
}
