//! TransferOrchestrator: source stream → fragments → uploads → session.
//!
//! Fragments are read sequentially and uploaded on a pool of
//! `fragment_workers` tasks. Completed uploads land in an index-keyed map and
//! only the contiguous prefix is appended to the session, so records always
//! go in strictly increasing, gap-free order.
//!
//! On the first fragment failure no further fragments are read, uploads of
//! higher indices are cancelled, and lower indices run to completion so the
//! failed index is well defined. Committed fragments above the failed index
//! are not part of the session.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_chunks::FragmentReader;
use tessera_core::{TransferError, TransferResult};
use tessera_storage::{NodeSelector, StorageTransport};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{TransferSession, UploadRecord};
use crate::settings::TransferSettings;
use crate::uploader::FragmentUploader;

/// Progress callback type (bytes_committed, bytes_read, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

pub struct TransferOrchestrator {
    uploader: Arc<FragmentUploader>,
    settings: TransferSettings,
    progress: Option<ProgressFn>,
}

impl TransferOrchestrator {
    pub fn new(
        selector: Arc<dyn NodeSelector>,
        transport: Arc<dyn StorageTransport>,
        settings: TransferSettings,
    ) -> Self {
        let uploader = FragmentUploader::new(selector, transport)
            .with_retry(settings.retry.clone())
            .with_task_size(settings.task_size())
            .with_max_in_flight(settings.max_in_flight_tasks);
        Self {
            uploader: Arc::new(uploader),
            settings,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Upload everything `source` yields.
    ///
    /// `Err` only for configuration problems found before any network
    /// activity. Every other outcome, including failure and cancellation, is
    /// reported through the returned session's status.
    pub async fn transfer<R>(
        &self,
        source: R,
        cancel: &CancellationToken,
    ) -> TransferResult<TransferSession>
    where
        R: AsyncRead + Unpin,
    {
        self.settings.validate()?;
        let mut reader = FragmentReader::new(source, self.settings.fragment_size)?;
        let mut session = TransferSession::new(self.settings.fragment_size as u64);
        let workers = self.settings.fragment_workers;

        info!(
            session = %session.id(),
            fragment_size = self.settings.fragment_size,
            workers,
            replicas = self.settings.policy.replicas,
            "transfer started"
        );

        let mut in_flight = FuturesUnordered::new();
        let mut tokens: BTreeMap<u64, CancellationToken> = BTreeMap::new();
        let mut completed: BTreeMap<u64, UploadRecord> = BTreeMap::new();
        let mut failure: Option<(u64, TransferError)> = None;
        let mut exhausted = false;

        loop {
            while !exhausted && failure.is_none() && in_flight.len() < workers {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = reader.next_fragment() => next,
                };
                match next {
                    Ok(Some(fragment)) => {
                        let index = fragment.index;
                        let root = fragment.root();
                        debug!(
                            index,
                            root = %root.short(),
                            bytes = fragment.len(),
                            "fragment addressed"
                        );

                        let token = cancel.child_token();
                        tokens.insert(index, token.clone());
                        let uploader = Arc::clone(&self.uploader);
                        let policy = self.settings.policy.clone();
                        let handle = tokio::spawn(async move {
                            let receipt = uploader.upload(&fragment, &root, &policy, &token).await?;
                            Ok::<_, TransferError>(UploadRecord {
                                fragment_index: fragment.index,
                                offset: fragment.offset,
                                length: fragment.len() as u64,
                                root: receipt.root,
                                commit_handle: receipt.commit_handle,
                                replication_achieved: receipt.replicas,
                                nodes: receipt.nodes,
                            })
                        });
                        in_flight.push(async move { (index, handle.await) });
                    }
                    Ok(None) => exhausted = true,
                    Err(source) => {
                        let index = reader.next_index();
                        warn!(index, "reading source failed: {source}");
                        failure = Some((
                            index,
                            TransferError::Source {
                                index: Some(index),
                                source,
                            },
                        ));
                    }
                }
            }

            let Some((index, joined)) = in_flight.next().await else {
                break;
            };
            tokens.remove(&index);
            let result = joined.unwrap_or_else(|e| {
                Err(TransferError::TransportFailure {
                    index: Some(index),
                    root: None,
                    attempts: 0,
                    message: format!("upload task aborted: {e}"),
                })
            });

            match result {
                Ok(record) => {
                    completed.insert(index, record);
                    self.merge(&mut session, &mut completed, &failure, reader.bytes_read());
                }
                Err(err) if err.is_cancelled() && !cancel.is_cancelled() => {
                    debug!(index, "upload cancelled behind a lower-index failure");
                }
                Err(err) => {
                    let err = err.at_fragment(index);
                    if failure.as_ref().map_or(true, |(failed, _)| index < *failed) {
                        for token in tokens.range(index + 1..).map(|(_, t)| t) {
                            token.cancel();
                        }
                        failure = Some((index, err));
                    }
                }
            }
        }

        if !completed.is_empty() {
            let orphaned: Vec<u64> = completed.keys().copied().collect();
            warn!(
                session = %session.id(),
                ?orphaned,
                "committed fragments beyond the failed index are not part of the session"
            );
        }

        match failure {
            Some((_, err)) if err.is_cancelled() && cancel.is_cancelled() => {
                session.cancel();
                warn!(session = %session.id(), status = ?session.status(), "transfer cancelled");
            }
            Some((index, err)) => {
                warn!(session = %session.id(), index, kind = ?err.kind(), "transfer failed: {err}");
                session.fail(index, &err);
            }
            None if !exhausted => {
                session.cancel();
                warn!(session = %session.id(), status = ?session.status(), "transfer cancelled");
            }
            None => {
                session.complete();
                info!(
                    session = %session.id(),
                    fragments = session.records().len(),
                    bytes = session.total_bytes(),
                    "transfer completed"
                );
            }
        }
        Ok(session)
    }

    /// Append the contiguous run of completed records that follows the
    /// session's last record, stopping short of a failed index.
    fn merge(
        &self,
        session: &mut TransferSession,
        completed: &mut BTreeMap<u64, UploadRecord>,
        failure: &Option<(u64, TransferError)>,
        bytes_read: u64,
    ) {
        loop {
            let next = session.next_index();
            if failure.as_ref().is_some_and(|(failed, _)| next >= *failed) {
                return;
            }
            let Some(record) = completed.remove(&next) else {
                return;
            };
            let message = format!(
                "fragment {} committed ({})",
                record.fragment_index,
                record.root.short()
            );
            session.append(record);
            if let Some(progress) = &self.progress {
                progress(session.total_bytes(), bytes_read, &message);
            }
        }
    }
}
