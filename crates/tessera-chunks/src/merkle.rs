//! Merkle root content addressing
//!
//! A payload is split into 4 KiB segments. Each segment is a BLAKE3 leaf,
//! leaves are paired level by level (an odd tail node is promoted as-is), and
//! the top of the tree is bound to the payload length:
//!
//! ```text
//! leaf   = BLAKE3(0x00 || segment)
//! parent = BLAKE3(0x01 || left || right)
//! root   = BLAKE3(0x02 || len_u64_le || top)
//! ```
//!
//! The empty payload has a single empty leaf, so it too has a canonical root.
//! This layout is part of the data contract: uploader and downloader must
//! agree on it bit for bit.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::io::Read;
use std::path::Path;

use crate::root::RootId;

/// Leaf segment size in bytes
pub const SEGMENT_SIZE: usize = 4096;

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;
const ROOT_TAG: u8 = 0x02;

/// Above this many segments, leaves are hashed on the rayon pool
const PARALLEL_LEAF_THRESHOLD: usize = 64;

fn leaf_hash(segment: &[u8]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_TAG]);
    hasher.update(segment);
    hasher.finalize()
}

fn node_hash(left: &blake3::Hash, right: &blake3::Hash) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_TAG]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hasher.finalize()
}

/// Reduce one level at a time until a single node remains.
fn tree_top(mut level: Vec<blake3::Hash>) -> blake3::Hash {
    debug_assert!(!level.is_empty());
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(left, right),
                [odd] => *odd,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level[0]
}

fn bind_length(len: u64, top: &blake3::Hash) -> RootId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[ROOT_TAG]);
    hasher.update(&len.to_le_bytes());
    hasher.update(top.as_bytes());
    RootId::from(hasher.finalize())
}

/// Compute the root identifier of an in-memory payload. Pure and total.
pub fn compute_root(data: &[u8]) -> RootId {
    let leaves: Vec<blake3::Hash> = if data.is_empty() {
        vec![leaf_hash(&[])]
    } else if data.len() / SEGMENT_SIZE >= PARALLEL_LEAF_THRESHOLD {
        data.par_chunks(SEGMENT_SIZE).map(leaf_hash).collect()
    } else {
        data.chunks(SEGMENT_SIZE).map(leaf_hash).collect()
    };
    bind_length(data.len() as u64, &tree_top(leaves))
}

/// Incremental form of [`compute_root`] for data that arrives in pieces.
///
/// Produces exactly the same root as hashing the concatenated input at once.
#[derive(Debug, Default)]
pub struct MerkleHasher {
    pending: Vec<u8>,
    leaves: Vec<blake3::Hash>,
    len: u64,
}

impl MerkleHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut data: &[u8]) -> &mut Self {
        self.len += data.len() as u64;

        if !self.pending.is_empty() {
            let take = (SEGMENT_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == SEGMENT_SIZE {
                self.leaves.push(leaf_hash(&self.pending));
                self.pending.clear();
            }
        }

        let whole = data.len() - data.len() % SEGMENT_SIZE;
        self.leaves
            .extend(data[..whole].chunks(SEGMENT_SIZE).map(leaf_hash));
        self.pending.extend_from_slice(&data[whole..]);
        self
    }

    pub fn finalize(mut self) -> RootId {
        if !self.pending.is_empty() || self.leaves.is_empty() {
            self.leaves.push(leaf_hash(&self.pending));
        }
        bind_length(self.len, &tree_top(self.leaves))
    }
}

/// Compute the root of everything a reader yields, without buffering it all.
pub fn compute_root_streaming<R: Read>(mut reader: R) -> std::io::Result<RootId> {
    let mut hasher = MerkleHasher::new();
    let mut buf = vec![0u8; 64 * 1024]; // 64KB read buffer

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

/// Root of a whole file on disk, streamed.
pub fn hash_file(path: &Path) -> Result<RootId> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening file for hashing: {}", path.display()))?;
    compute_root_streaming(std::io::BufReader::new(file))
        .with_context(|| format!("reading file for hashing: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_root_is_deterministic() {
        let r1 = compute_root(b"");
        let r2 = compute_root(b"");
        assert_eq!(r1, r2);
        assert_eq!(MerkleHasher::new().finalize(), r1);
    }

    #[test]
    fn different_content_different_root() {
        assert_ne!(compute_root(b"foo"), compute_root(b"bar"));
    }

    #[test]
    fn length_is_bound_into_root() {
        let one = vec![0u8; SEGMENT_SIZE];
        let padded = vec![0u8; SEGMENT_SIZE + 1];
        assert_ne!(compute_root(&one), compute_root(&padded));
        assert_ne!(compute_root(&[]), compute_root(&[0u8]));
    }

    #[test]
    fn parallel_and_sequential_leaves_agree() {
        let data: Vec<u8> = (0u32..(SEGMENT_SIZE as u32 * 100))
            .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
            .collect();
        let mut hasher = MerkleHasher::new();
        hasher.update(&data);
        assert_eq!(compute_root(&data), hasher.finalize());
    }

    #[test]
    fn streaming_matches_in_memory() {
        let data: Vec<u8> = (0u32..50_000).map(|i| (i % 251) as u8).collect();
        let streamed = compute_root_streaming(&data[..]).unwrap();
        assert_eq!(streamed, compute_root(&data));
    }

    #[test]
    fn hash_file_matches_in_memory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("payload.bin");
        let data = vec![0x5au8; 3 * SEGMENT_SIZE + 17];
        std::fs::write(&path, &data).unwrap();

        assert_eq!(hash_file(&path).unwrap(), compute_root(&data));
    }

    proptest! {
        #[test]
        fn root_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..=16384)) {
            prop_assert_eq!(compute_root(&data), compute_root(&data));
        }

        /// Feeding the hasher in arbitrary pieces yields the one-shot root
        #[test]
        fn incremental_matches_one_shot(
            data in proptest::collection::vec(any::<u8>(), 0..=20000),
            split in 1usize..=5000,
        ) {
            let mut hasher = MerkleHasher::new();
            for piece in data.chunks(split) {
                hasher.update(piece);
            }
            prop_assert_eq!(hasher.finalize(), compute_root(&data));
        }

        #[test]
        fn single_byte_flip_changes_root(
            data in proptest::collection::vec(any::<u8>(), 1..=9000),
            pos in any::<prop::sample::Index>(),
        ) {
            let mut tampered = data.clone();
            let i = pos.index(tampered.len());
            tampered[i] ^= 0x01;
            prop_assert_ne!(compute_root(&data), compute_root(&tampered));
        }
    }
}
