//! Transfer session: the ordered record of committed fragments.

use serde::{Deserialize, Serialize};
use tessera_chunks::RootId;
use tessera_core::{FailureKind, TransferError};
use tessera_storage::CommitHandle;
use uuid::Uuid;

/// One committed fragment. Created on success and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub fragment_index: u64,
    pub offset: u64,
    pub length: u64,
    pub root: RootId,
    pub commit_handle: CommitHandle,
    /// Distinct nodes holding an acknowledged copy
    pub replication_achieved: u32,
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed {
        index: u64,
        kind: FailureKind,
        reason: String,
    },
    /// Stopped by the caller; `index` is the lowest fragment not committed
    Cancelled { index: u64 },
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSession {
    id: Uuid,
    fragment_size: u64,
    total_bytes: u64,
    records: Vec<UploadRecord>,
    status: SessionStatus,
}

impl TransferSession {
    pub fn new(fragment_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            fragment_size,
            total_bytes: 0,
            records: Vec::new(),
            status: SessionStatus::InProgress,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn fragment_size(&self) -> u64 {
        self.fragment_size
    }

    /// Bytes covered by committed records
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn records(&self) -> &[UploadRecord] {
        &self.records
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Roots in fragment order
    pub fn roots(&self) -> Vec<RootId> {
        self.records.iter().map(|r| r.root).collect()
    }

    /// Index the next appended record must carry
    pub fn next_index(&self) -> u64 {
        self.records.len() as u64
    }

    /// Append the next record. Records arrive in strictly increasing,
    /// gap-free index order; anything else is a bug in the caller.
    pub(crate) fn append(&mut self, record: UploadRecord) {
        debug_assert_eq!(record.fragment_index, self.next_index());
        debug_assert!(!self.status.is_terminal());
        self.total_bytes += record.length;
        self.records.push(record);
    }

    pub(crate) fn complete(&mut self) {
        self.status = SessionStatus::Completed;
    }

    pub(crate) fn fail(&mut self, index: u64, err: &TransferError) {
        self.status = SessionStatus::Failed {
            index,
            kind: err.kind(),
            reason: err.to_string(),
        };
    }

    pub(crate) fn cancel(&mut self) {
        self.status = SessionStatus::Cancelled {
            index: self.next_index(),
        };
    }

    pub fn to_json(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| anyhow::anyhow!("serializing session: {e}"))
    }

    pub fn from_json(data: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(data).map_err(|e| anyhow::anyhow!("parsing session report: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_chunks::compute_root;

    fn record(index: u64, payload: &[u8]) -> UploadRecord {
        UploadRecord {
            fragment_index: index,
            offset: index * 8,
            length: payload.len() as u64,
            root: compute_root(payload),
            commit_handle: CommitHandle::new(format!("mem://a#{index}")),
            replication_achieved: 1,
            nodes: vec!["mem://a".into()],
        }
    }

    #[test]
    fn append_tracks_bytes_and_roots() {
        let mut session = TransferSession::new(8);
        session.append(record(0, b"aaaaaaaa"));
        session.append(record(1, b"bb"));
        session.complete();

        assert!(session.is_completed());
        assert_eq!(session.total_bytes(), 10);
        assert_eq!(
            session.roots(),
            vec![compute_root(b"aaaaaaaa"), compute_root(b"bb")]
        );
    }

    #[test]
    fn failed_status_report_shape() {
        let mut session = TransferSession::new(8);
        session.append(record(0, b"x"));
        let err = TransferError::SelectionExhausted {
            index: Some(1),
            reason: "0 eligible node(s)".into(),
        };
        session.fail(1, &err);

        let json: serde_json::Value = serde_json::from_slice(&session.to_json().unwrap()).unwrap();
        assert_eq!(json["status"]["state"], "failed");
        assert_eq!(json["status"]["index"], 1);
        assert_eq!(json["status"]["kind"], "selection_exhausted");
        assert_eq!(json["records"].as_array().unwrap().len(), 1);
        assert!(json["records"][0]["root"].as_str().unwrap().starts_with("0x"));

        let back = TransferSession::from_json(&session.to_json().unwrap()).unwrap();
        assert_eq!(back.id(), session.id());
        assert_eq!(back.status(), session.status());
    }

    #[test]
    fn cancel_points_at_first_uncommitted() {
        let mut session = TransferSession::new(8);
        session.append(record(0, b"x"));
        session.cancel();
        assert_eq!(session.status(), &SessionStatus::Cancelled { index: 1 });
    }
}
