//! tessera-chunks: fixed-size fragmenting and Merkle root content addressing
//!
//! # Overview
//! - `root`: the 32-byte root identifier that addresses a fragment
//! - `merkle`: deterministic tree hash over 4 KiB segments (the content addresser)
//! - `fragment`: splitting a payload or an async byte stream into fragments

pub mod fragment;
pub mod merkle;
pub mod root;

// Convenience re-exports for the most common operations
pub use fragment::{split_slice, Fragment, FragmentReader};
pub use merkle::{compute_root, compute_root_streaming, hash_file, MerkleHasher, SEGMENT_SIZE};
pub use root::RootId;
