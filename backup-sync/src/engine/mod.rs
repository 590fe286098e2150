//! Per-node sync state machine.
//!
//! A node moves from `LocalOnly` (or `NeedsUpdate`) to `RemoteAndLocal` either
//! by adopting a cached dedup record or by uploading. Transient upload
//! failures are retried with linear backoff up to the policy's bound; anything
//! else ends the node's sync immediately.

pub mod retry;

use crate::fs::metadata::LocalMetadata;
use crate::progress::Progress;
use crate::remote::{RemoteRef, RemoteUploader, UploadRequest};
use crate::repository::{DedupRecord, SharedRepository};
use crate::tree::{BackupTree, NodeId};
use crate::utils::errors::{SyncError, UploadError};
use retry::{Backoff, RetryPolicy, TokioBackoff};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a node reached `RemoteAndLocal`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    Dedup,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Synced(SyncSource),
    /// Retry budget exhausted; the node keeps the status it had.
    Abandoned { attempts: u8 },
    /// The run was cancelled before the node finished.
    Cancelled,
}

impl NodeOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, NodeOutcome::Synced(_))
    }
}

enum AttemptError {
    Fatal(SyncError),
    Transient(UploadError),
    Cancelled,
}

impl From<SyncError> for AttemptError {
    fn from(err: SyncError) -> Self {
        AttemptError::Fatal(err)
    }
}

/// Drives single nodes to `RemoteAndLocal`. Cheap to clone; every sync unit
/// holds its own copy.
#[derive(Clone)]
pub struct NodeSyncer {
    repository: SharedRepository,
    remote: Arc<dyn RemoteUploader>,
    progress: Progress,
    policy: RetryPolicy,
    backoff: Arc<dyn Backoff>,
    cancel: CancellationToken,
}

impl NodeSyncer {
    pub fn new(
        repository: SharedRepository,
        remote: Arc<dyn RemoteUploader>,
        progress: Progress,
    ) -> Self {
        Self {
            repository,
            remote,
            progress,
            policy: RetryPolicy::default(),
            backoff: Arc::new(TokioBackoff),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sync one node.
    ///
    /// `Err` means the node failed for a reason retrying cannot fix (no local
    /// path, unreadable path, unsynced remote parent, full remote storage,
    /// broken dedup repository). Exhausting the retry budget is not an error:
    /// it yields [`NodeOutcome::Abandoned`].
    pub async fn sync_node(&self, tree: &BackupTree, id: NodeId) -> Result<NodeOutcome, SyncError> {
        loop {
            let error = match self.attempt(tree, id).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Cancelled) => return Ok(NodeOutcome::Cancelled),
                Err(AttemptError::Transient(err)) => err,
            };

            let max_retries = self.policy.max_retries();
            let (local_id, retry, retries) = tree.update(id, |node| {
                let retry = node.bump_retry(max_retries);
                (node.local_id.clone(), retry, node.retries)
            });

            let Some(retry) = retry else {
                let attempts = retries + 1;
                warn!(
                    "Giving up on {} after {} attempts: {}",
                    local_id, attempts, error
                );
                return Ok(NodeOutcome::Abandoned { attempts });
            };

            let delay = self.policy.delay_for(retry);
            warn!(
                "Upload of {} failed, retry {}/{} in {:?}: {}",
                local_id, retry, max_retries, delay, error
            );

            tokio::select! {
                _ = self.backoff.wait(delay) => {}
                _ = self.cancel.cancelled() => return Ok(NodeOutcome::Cancelled),
            }
        }
    }

    async fn attempt(&self, tree: &BackupTree, id: NodeId) -> Result<NodeOutcome, AttemptError> {
        if self.cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }

        let mut node = tree.get(id);
        let path = node
            .path
            .clone()
            .ok_or_else(|| SyncError::CannotGetPath(node.local_id.clone()))?;
        // The cache is keyed by path text; a lossy key could alias another file.
        let key = path
            .to_str()
            .map(str::to_owned)
            .ok_or_else(|| SyncError::CannotGetPath(node.local_id.clone()))?;

        let local = tokio::select! {
            result = LocalMetadata::read(&path) => {
                result.map_err(|source| SyncError::PathUnavailable { path: path.clone(), source })?
            }
            _ = self.cancel.cancelled() => return Err(AttemptError::Cancelled),
        };

        let cached = tokio::select! {
            result = self.repository.find(key.clone(), node.device_id.clone()) => {
                result.map_err(SyncError::from)?
            }
            _ = self.cancel.cancelled() => return Err(AttemptError::Cancelled),
        };

        let previous = match cached {
            Some(record) if node.is_folder() || record.modified_at >= local.modified => {
                debug!(
                    "Dedup hit for {} (remote id {})",
                    node.local_id, record.remote_id
                );
                return Ok(self.complete(tree, id, record.remote_ref(), SyncSource::Dedup));
            }
            Some(record) => {
                tree.update(id, |n| n.mark_needs_update());
                node = tree.get(id);
                debug!("{} changed since its last sync", node.local_id);
                Some(record)
            }
            None => None,
        };

        let parent_id = node
            .remote_parent_id()
            .ok_or_else(|| SyncError::MissingRemoteParent(node.local_id.clone()))?;

        let request = UploadRequest {
            node: &node,
            path: &path,
            parent_id,
            size: local.size,
            previous: previous.as_ref(),
        };
        let result = tokio::select! {
            result = self.remote.upload(request) => result,
            _ = self.cancel.cancelled() => return Err(AttemptError::Cancelled),
        };

        let remote = match result {
            Ok(remote) => remote,
            Err(err) if err.is_cancelled() => return Err(AttemptError::Cancelled),
            Err(err) if err.is_storage_full() => {
                return Err(AttemptError::Fatal(SyncError::StorageFull(
                    node.local_id.clone(),
                )))
            }
            Err(err) => return Err(AttemptError::Transient(err)),
        };

        let record = DedupRecord {
            path: key,
            device_id: node.device_id.clone(),
            remote_id: remote.id,
            remote_uuid: remote.uuid.clone(),
            modified_at: local.modified,
        };
        if let Err(e) = self.repository.upsert(record).await {
            warn!("Failed to record sync of {}: {}", node.local_id, e);
        }

        Ok(self.complete(tree, id, remote, SyncSource::Upload))
    }

    fn complete(
        &self,
        tree: &BackupTree,
        id: NodeId,
        remote: RemoteRef,
        source: SyncSource,
    ) -> NodeOutcome {
        let remote_id = remote.id;
        if tree.update(id, |node| node.mark_synced(remote)) {
            self.progress.increment();
        }
        tree.propagate_remote_parent(id, remote_id);
        NodeOutcome::Synced(source)
    }
}
