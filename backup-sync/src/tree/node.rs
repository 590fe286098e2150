//! Backup node: one local file or folder under backup.

use crate::remote::RemoteRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Index of a node inside its [`BackupTree`](super::BackupTree) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// Sync status of a node.
///
/// `LocalOnly -> NeedsUpdate -> RemoteAndLocal`; `NeedsUpdate` only occurs for
/// files whose cached record is older than the local modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    LocalOnly,
    NeedsUpdate,
    RemoteAndLocal,
}

#[derive(Debug, Clone)]
pub struct BackupNode {
    pub id: NodeId,
    /// Path relative to the snapshot root, `/`-separated; empty for the root
    pub local_id: String,
    pub parent: Option<NodeId>,
    pub device_id: String,
    pub name: String,
    pub kind: NodeKind,
    /// Absolute local path; `None` once it can no longer be resolved
    pub path: Option<PathBuf>,
    pub children: Vec<NodeId>,
    pub(crate) status: SyncStatus,
    pub(crate) remote_id: Option<u64>,
    pub(crate) remote_uuid: Option<String>,
    pub(crate) remote_parent_id: Option<u64>,
    pub(crate) retries: u8,
}

impl BackupNode {
    pub(crate) fn new(
        id: NodeId,
        parent: Option<NodeId>,
        local_id: String,
        name: String,
        kind: NodeKind,
        path: PathBuf,
        device_id: String,
    ) -> Self {
        Self {
            id,
            local_id,
            parent,
            device_id,
            name,
            kind,
            path: Some(path),
            children: Vec::new(),
            status: SyncStatus::LocalOnly,
            remote_id: None,
            remote_uuid: None,
            remote_parent_id: None,
            retries: 0,
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn remote_id(&self) -> Option<u64> {
        self.remote_id
    }

    pub fn remote_uuid(&self) -> Option<&str> {
        self.remote_uuid.as_deref()
    }

    pub fn remote_parent_id(&self) -> Option<u64> {
        self.remote_parent_id
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_synced(&self) -> bool {
        self.status == SyncStatus::RemoteAndLocal
    }

    /// Remote identifiers, once the node has been synced.
    pub fn remote_ref(&self) -> Option<RemoteRef> {
        self.remote_id.map(|id| RemoteRef {
            id,
            uuid: self.remote_uuid.clone(),
        })
    }

    /// Adopt remote identifiers and move to `RemoteAndLocal`.
    ///
    /// Returns true only for the first transition, so callers can count each
    /// node at most once.
    pub(crate) fn mark_synced(&mut self, remote: RemoteRef) -> bool {
        let first = self.status != SyncStatus::RemoteAndLocal;
        self.remote_id = Some(remote.id);
        self.remote_uuid = remote.uuid;
        self.status = SyncStatus::RemoteAndLocal;
        first
    }

    /// Folders are never re-uploaded once created, so only files can go stale.
    pub(crate) fn mark_needs_update(&mut self) {
        if self.kind == NodeKind::File && self.status == SyncStatus::LocalOnly {
            self.status = SyncStatus::NeedsUpdate;
        }
    }

    pub(crate) fn set_remote_parent(&mut self, remote_parent_id: u64) {
        self.remote_parent_id = Some(remote_parent_id);
    }

    /// Consume one retry if the budget allows; returns the new retry count.
    pub(crate) fn bump_retry(&mut self, max_retries: u8) -> Option<u8> {
        if self.retries < max_retries {
            self.retries += 1;
            Some(self.retries)
        } else {
            None
        }
    }
}
