//! Error types for the backup sync engine.

use crate::remote::STORAGE_FULL_STATUS;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide error for everything outside a single node's sync.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<walkdir::Error> for BackupError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
        BackupError::Filesystem {
            path,
            source: std::io::Error::from(err),
        }
    }
}

impl From<config::ConfigError> for BackupError {
    fn from(err: config::ConfigError) -> Self {
        BackupError::Config(err.to_string())
    }
}

/// Errors a single node can end its sync with.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("cannot get local path for node '{0}'")]
    CannotGetPath(String),

    #[error("local path unavailable: {}: {source}", path.display())]
    PathUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote parent of '{0}' has not been synced")]
    MissingRemoteParent(String),

    #[error("remote storage is full (while syncing '{0}')")]
    StorageFull(String),

    #[error("gave up on '{local_id}' after {attempts} attempts")]
    RetriesExhausted { local_id: String, attempts: u8 },

    #[error("dedup repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("sync task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Storage exhaustion stops the whole run, everything else only its branch.
    pub fn is_storage_full(&self) -> bool {
        matches!(self, SyncError::StorageFull(_))
    }
}

/// Errors returned by a remote upload implementation.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("remote rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn is_storage_full(&self) -> bool {
        matches!(self, UploadError::Rejected { status, .. } if *status == STORAGE_FULL_STATUS)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Transport(err.to_string())
    }
}

/// Errors raised by a dedup repository backend.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Repository lock poisoned")]
    Poisoned,

    #[error("Repository task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, BackupError>;
