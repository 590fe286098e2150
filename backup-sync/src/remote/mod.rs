//! Remote upload contract.
//!
//! The engine only needs one operation from the remote side: make this node
//! exist remotely and hand back its identifiers.

pub mod http;

pub use http::HttpRemote;

use crate::repository::DedupRecord;
use crate::tree::BackupNode;
use crate::utils::errors::UploadError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Status code the remote API answers with when the account is out of space.
pub const STORAGE_FULL_STATUS: u16 = 420;

/// Remote identifiers of a synced node: numeric id plus optional opaque uuid.
///
/// Returned by a successful upload and handed to children as their remote parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteRef {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl RemoteRef {
    pub fn new(id: u64, uuid: Option<String>) -> Self {
        Self { id, uuid }
    }
}

/// Everything an uploader needs to create or update one node remotely
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub node: &'a BackupNode,

    /// Resolved local path of the node
    pub path: &'a Path,

    /// Remote id of the folder the node goes into
    pub parent_id: u64,

    /// Size in bytes at the time of the sync (0 for folders)
    pub size: u64,

    /// Stale cache record when the file changed since its last sync; a backend
    /// may replace that remote file's content instead of creating a new one
    pub previous: Option<&'a DedupRecord>,
}

#[async_trait]
pub trait RemoteUploader: Send + Sync {
    async fn upload(&self, request: UploadRequest<'_>) -> Result<RemoteRef, UploadError>;
}
