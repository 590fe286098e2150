//! Utility modules for the backup sync engine.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, RepositoryError, Result, SyncError, UploadError};
