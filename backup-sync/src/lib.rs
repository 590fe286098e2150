//! Backup Sync Library
//!
//! One-directional local-to-remote backup: snapshot a directory tree, skip
//! what the dedup cache already knows, upload the rest parent-first with
//! bounded concurrency and bounded retries.

pub mod config;
pub mod daemon;
pub mod engine;
pub mod executor;
pub mod fs;
pub mod progress;
pub mod remote;
pub mod repository;
pub mod scheduler;
pub mod tree;
pub mod utils;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use config::Config;
pub use engine::{NodeOutcome, NodeSyncer};
pub use executor::{BackupExecutor, BackupJob, BackupReport};
pub use progress::Progress;
pub use remote::{HttpRemote, RemoteRef, RemoteUploader};
pub use repository::{DedupRecord, DedupRepository, SharedRepository, SqliteDedupRepository};
pub use tree::{BackupNode, BackupTree, NodeId, SyncStatus};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
