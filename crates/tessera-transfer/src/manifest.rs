//! TransferManifest: the JSON artifact `download` consumes.
//!
//! Derived from a Completed session. Holds what retrieval needs to rebuild
//! the file: the ordered fragment roots plus enough sizing to sanity-check
//! them.

use serde::{Deserialize, Serialize};
use tessera_chunks::RootId;
use uuid::Uuid;

use crate::session::TransferSession;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferManifest {
    pub version: u32,
    /// Session that produced the roots
    pub session_id: Uuid,
    /// Source file name, when the upload came from a file
    pub file_name: Option<String>,
    pub total_size: u64,
    pub fragment_size: u64,
    /// Fragment roots in index order
    pub roots: Vec<RootId>,
}

impl TransferManifest {
    /// Build from a session. Only Completed sessions describe a whole file.
    pub fn from_session(
        session: &TransferSession,
        file_name: Option<String>,
    ) -> anyhow::Result<Self> {
        if !session.is_completed() {
            anyhow::bail!(
                "session {} is not completed ({:?})",
                session.id(),
                session.status()
            );
        }
        Ok(Self {
            version: MANIFEST_VERSION,
            session_id: session.id(),
            file_name,
            total_size: session.total_bytes(),
            fragment_size: session.fragment_size(),
            roots: session.roots(),
        })
    }

    /// Fragment count implied by the sizes
    pub fn expected_fragments(&self) -> u64 {
        if self.fragment_size == 0 {
            return 0;
        }
        self.total_size.div_ceil(self.fragment_size)
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        let manifest: TransferManifest = serde_json::from_slice(data)
            .map_err(|e| anyhow::anyhow!("parsing manifest: {e}"))?;
        if manifest.version > MANIFEST_VERSION {
            anyhow::bail!("unsupported manifest version {}", manifest.version);
        }
        if manifest.fragment_size == 0 && manifest.total_size > 0 {
            anyhow::bail!("manifest has zero fragment size");
        }
        if manifest.roots.len() as u64 != manifest.expected_fragments() {
            anyhow::bail!(
                "manifest lists {} roots but {} bytes at {} per fragment needs {}",
                manifest.roots.len(),
                manifest.total_size,
                manifest.fragment_size,
                manifest.expected_fragments()
            );
        }
        Ok(manifest)
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| anyhow::anyhow!("serializing manifest: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_chunks::compute_root;

    fn manifest(total_size: u64, roots: usize) -> TransferManifest {
        TransferManifest {
            version: MANIFEST_VERSION,
            session_id: Uuid::new_v4(),
            file_name: Some("data.bin".into()),
            total_size,
            fragment_size: 300,
            roots: (0..roots).map(|i| compute_root(&[i as u8])).collect(),
        }
    }

    #[test]
    fn parse_checks_root_count() {
        let good = manifest(1000, 4);
        let parsed = TransferManifest::from_bytes(&good.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, good);

        let short = manifest(1000, 3);
        let err = TransferManifest::from_bytes(&short.to_bytes().unwrap()).unwrap_err();
        assert!(err.to_string().contains("needs 4"));
    }

    #[test]
    fn empty_file_has_no_roots() {
        let empty = manifest(0, 0);
        assert_eq!(empty.expected_fragments(), 0);
        assert!(TransferManifest::from_bytes(&empty.to_bytes().unwrap()).is_ok());
    }

    #[test]
    fn in_progress_session_is_rejected() {
        let session = TransferSession::new(300);
        assert!(TransferManifest::from_session(&session, None).is_err());
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut future = manifest(0, 0);
        future.version = MANIFEST_VERSION + 1;
        assert!(TransferManifest::from_bytes(&future.to_bytes().unwrap()).is_err());
    }
}
