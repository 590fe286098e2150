//! In-memory snapshot of a local directory tree.
//!
//! Nodes live in an arena addressed by [`NodeId`]; parent and child links are
//! ids, never references. Each node sits behind its own lock so a sync unit can
//! update its node while others run, but a lock is never held across an await.

pub mod node;
pub mod snapshot;

pub use node::{BackupNode, NodeId, NodeKind, SyncStatus};
pub use snapshot::generate_tree;

use crate::fs::walker::SkippedEntry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Count of nodes per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub local_only: usize,
    pub needs_update: usize,
    pub remote_and_local: usize,
}

#[derive(Debug)]
pub struct BackupTree {
    nodes: Vec<Mutex<BackupNode>>,
    index: HashMap<String, NodeId>,
    root: NodeId,
    root_path: PathBuf,
    skipped: Vec<SkippedEntry>,
}

impl BackupTree {
    pub(crate) fn from_nodes(
        nodes: Vec<BackupNode>,
        root: NodeId,
        root_path: PathBuf,
        skipped: Vec<SkippedEntry>,
    ) -> Self {
        let index = nodes
            .iter()
            .map(|node| (node.local_id.clone(), node.id))
            .collect();
        Self {
            nodes: nodes.into_iter().map(Mutex::new).collect(),
            index,
            root,
            root_path,
            skipped,
        }
    }

    /// The synthetic root node standing for the remote device folder
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Entries the snapshot walk had to leave out; they have no node
    pub fn skipped(&self) -> &[SkippedEntry] {
        &self.skipped
    }

    /// Number of nodes including the synthetic root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes that take part in a run (everything but the root)
    pub fn syncable_count(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Copy of a node's current state
    pub fn get(&self, id: NodeId) -> BackupNode {
        self.lock(id).clone()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.lock(id).children.clone()
    }

    /// Look a node up by its root-relative, `/`-separated path
    pub fn find(&self, relative_path: &str) -> Option<NodeId> {
        self.index.get(relative_path).copied()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for id in self.ids().filter(|id| *id != self.root) {
            match self.lock(id).status {
                SyncStatus::LocalOnly => counts.local_only += 1,
                SyncStatus::NeedsUpdate => counts.needs_update += 1,
                SyncStatus::RemoteAndLocal => counts.remote_and_local += 1,
            }
        }
        counts
    }

    /// Mutate a node in place under its lock
    pub(crate) fn update<R>(&self, id: NodeId, f: impl FnOnce(&mut BackupNode) -> R) -> R {
        let mut guard = self.lock(id);
        f(&mut *guard)
    }

    /// Hand a freshly synced folder's remote id down to its direct children
    pub(crate) fn propagate_remote_parent(&self, id: NodeId, remote_id: u64) {
        for child in self.children(id) {
            self.update(child, |node| node.set_remote_parent(remote_id));
        }
    }

    fn lock(&self, id: NodeId) -> MutexGuard<'_, BackupNode> {
        // Every mutation is a plain field assignment, so a poisoned node is still consistent.
        self.nodes[id.0]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
