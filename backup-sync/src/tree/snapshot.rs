//! Tree snapshotter: walks a local subtree once and builds the node arena.

use super::node::{BackupNode, NodeId, NodeKind};
use super::BackupTree;
use crate::fs::walker::{walk_tree, WalkOptions};
use crate::remote::RemoteRef;
use crate::utils::errors::BackupError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Walk `root` and build a [`BackupTree`].
///
/// The root becomes a synthetic folder node that stands for the remote device
/// folder `root_ref`: it starts out synced and its direct children already
/// know their remote parent. Every other entry starts `LocalOnly`.
///
/// The walk completes before any network activity; later filesystem changes
/// are not observed.
pub fn generate_tree(
    root: &Path,
    options: &WalkOptions,
    device_id: &str,
    root_ref: RemoteRef,
) -> Result<BackupTree, BackupError> {
    let metadata = std::fs::metadata(root).map_err(|source| BackupError::Filesystem {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(BackupError::Filesystem {
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        });
    }

    // Node paths double as dedup keys, so they must convert to text exactly.
    let Some(root_str) = root.to_str() else {
        return Err(BackupError::Filesystem {
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "path is not valid UTF-8"),
        });
    };

    let walk = walk_tree(root, options)?;
    let entries = walk.entries;

    let root_id = NodeId(0);
    let root_name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(root_str)
        .to_string();
    let mut root_node = BackupNode::new(
        root_id,
        None,
        String::new(),
        root_name,
        NodeKind::Folder,
        root.to_path_buf(),
        device_id.to_string(),
    );
    root_node.mark_synced(root_ref);

    let mut nodes = Vec::with_capacity(entries.len() + 1);
    nodes.push(root_node);

    let mut by_path: HashMap<PathBuf, NodeId> = HashMap::with_capacity(entries.len());
    let mut folders = 0usize;
    let mut bytes = 0u64;

    for entry in entries {
        // The walk yields parents first, so a parent is always indexed already.
        let parent = entry
            .relative_path
            .parent()
            .and_then(|p| by_path.get(p).copied())
            .unwrap_or(root_id);

        let id = NodeId(nodes.len());
        let kind = if entry.is_dir {
            folders += 1;
            NodeKind::Folder
        } else {
            bytes += entry.size;
            NodeKind::File
        };

        let mut node = BackupNode::new(
            id,
            Some(parent),
            entry.relative_key,
            entry.name,
            kind,
            entry.path.clone(),
            device_id.to_string(),
        );
        if parent == root_id {
            if let Some(remote_root) = nodes[root_id.0].remote_id {
                node.set_remote_parent(remote_root);
            }
        }

        nodes[parent.0].children.push(id);
        by_path.insert(entry.relative_path, id);
        nodes.push(node);
    }

    let files = nodes.len() - 1 - folders;
    info!(
        "Snapshot of {}: {} folders, {} files ({} bytes)",
        root.display(),
        folders,
        files,
        bytes
    );
    if !walk.skipped.is_empty() {
        warn!(
            "Snapshot of {} left out {} entries",
            root.display(),
            walk.skipped.len()
        );
    }
    debug!("Snapshot holds {} nodes including the root", nodes.len());

    Ok(BackupTree::from_nodes(
        nodes,
        root_id,
        root.to_path_buf(),
        walk.skipped,
    ))
}
