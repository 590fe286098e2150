//! File metadata used for dedup decisions.
//!
//! Modification times are kept at millisecond precision, which is what the
//! dedup repository persists; comparing at a finer precision would make every
//! reloaded record look stale.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata of a local entry at the time it is synced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMetadata {
    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modified time, truncated to milliseconds
    pub modified: DateTime<Utc>,

    /// Is this a directory?
    pub is_dir: bool,
}

impl LocalMetadata {
    pub fn from_std(metadata: &std::fs::Metadata) -> std::io::Result<Self> {
        let is_dir = metadata.is_dir();
        Ok(Self {
            size: if is_dir { 0 } else { metadata.len() },
            modified: to_millis(metadata.modified()?),
            is_dir,
        })
    }

    /// Read metadata from a path, following symlinks
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        Self::from_std(&std::fs::metadata(path)?)
    }

    /// Read metadata without blocking the runtime
    pub async fn read(path: &Path) -> std::io::Result<Self> {
        Self::from_std(&tokio::fs::metadata(path).await?)
    }
}

/// Convert a system time to a UTC timestamp truncated to milliseconds.
/// Times before the Unix epoch collapse to the epoch.
pub fn to_millis(time: SystemTime) -> DateTime<Utc> {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
