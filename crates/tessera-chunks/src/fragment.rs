//! Fixed-size fragmenting
//!
//! A payload is cut into contiguous, non-overlapping windows of exactly
//! `fragment_size` bytes; only the final window may be shorter. An empty
//! payload yields no fragments. Concatenating fragments in index order gives
//! back the original bytes.

use bytes::Bytes;
use std::ops::Range;
use tessera_core::{TransferError, TransferResult};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::merkle::compute_root;
use crate::root::RootId;

/// One contiguous slice of the source payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Ordinal position in the source
    pub index: u64,
    /// Byte offset within the source
    pub offset: u64,
    pub payload: Bytes,
}

impl Fragment {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// `[offset, offset + len)` within the source
    pub fn byte_range(&self) -> Range<u64> {
        self.offset..self.offset + self.payload.len() as u64
    }

    pub fn root(&self) -> RootId {
        compute_root(&self.payload)
    }
}

fn check_size(fragment_size: usize) -> TransferResult<()> {
    if fragment_size == 0 {
        return Err(TransferError::Configuration(
            "fragment size must be greater than 0".into(),
        ));
    }
    Ok(())
}

/// Split an in-memory payload into fragments.
pub fn split_slice(data: &[u8], fragment_size: usize) -> TransferResult<Vec<Fragment>> {
    check_size(fragment_size)?;
    let shared = Bytes::copy_from_slice(data);
    Ok((0..data.len())
        .step_by(fragment_size)
        .enumerate()
        .map(|(index, start)| {
            let end = (start + fragment_size).min(data.len());
            Fragment {
                index: index as u64,
                offset: start as u64,
                payload: shared.slice(start..end),
            }
        })
        .collect())
}

/// Reads fragment-size windows from an async byte source, in order.
///
/// The source is consumed strictly sequentially and never rewound. Short
/// reads from the source are coalesced, so every fragment but the last is
/// exactly `fragment_size` bytes regardless of how the source delivers data.
pub struct FragmentReader<R> {
    source: R,
    fragment_size: usize,
    next_index: u64,
    offset: u64,
    exhausted: bool,
}

impl<R: AsyncRead + Unpin> FragmentReader<R> {
    pub fn new(source: R, fragment_size: usize) -> TransferResult<Self> {
        check_size(fragment_size)?;
        Ok(Self {
            source,
            fragment_size,
            next_index: 0,
            offset: 0,
            exhausted: false,
        })
    }

    /// Total bytes consumed from the source so far
    pub fn bytes_read(&self) -> u64 {
        self.offset
    }

    /// Index the next fragment will carry
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Read the next window. `Ok(None)` once the source is exhausted.
    pub async fn next_fragment(&mut self) -> std::io::Result<Option<Fragment>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.fragment_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.source.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.exhausted = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);

        let fragment = Fragment {
            index: self.next_index,
            offset: self.offset,
            payload: Bytes::from(buf),
        };
        self.next_index += 1;
        self.offset += filled as u64;
        Ok(Some(fragment))
    }
}
