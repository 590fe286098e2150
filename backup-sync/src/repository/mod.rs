//! Dedup repository: persisted results of earlier syncs.
//!
//! Keyed by (local path, device id). A record tells the engine which remote
//! node a local entry was last uploaded as, and the modification time it had
//! then; anything modified since needs a fresh upload.

pub mod sqlite;

pub use sqlite::SqliteDedupRepository;

use crate::remote::RemoteRef;
use crate::utils::errors::RepositoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    /// Absolute local path
    pub path: String,
    pub device_id: String,
    pub remote_id: u64,
    pub remote_uuid: Option<String>,
    /// Modification time of the local entry when it was last synced
    pub modified_at: DateTime<Utc>,
}

impl DedupRecord {
    pub fn remote_ref(&self) -> RemoteRef {
        RemoteRef::new(self.remote_id, self.remote_uuid.clone())
    }
}

/// Storage backend for dedup records.
///
/// Implementations need not be safe for concurrent use; the engine only
/// reaches them through [`SharedRepository`].
pub trait DedupRepository: Send {
    fn find(&self, path: &str, device_id: &str) -> Result<Option<DedupRecord>, RepositoryError>;

    fn upsert(&mut self, record: &DedupRecord) -> Result<(), RepositoryError>;
}

/// Volatile repository, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryDedupRepository {
    records: HashMap<(String, String), DedupRecord>,
}

impl MemoryDedupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DedupRepository for MemoryDedupRepository {
    fn find(&self, path: &str, device_id: &str) -> Result<Option<DedupRecord>, RepositoryError> {
        Ok(self
            .records
            .get(&(path.to_string(), device_id.to_string()))
            .cloned())
    }

    fn upsert(&mut self, record: &DedupRecord) -> Result<(), RepositoryError> {
        self.records.insert(
            (record.path.clone(), record.device_id.clone()),
            record.clone(),
        );
        Ok(())
    }
}

/// Serialized, async access to a [`DedupRepository`] shared by all sync units.
///
/// Every call takes the lock on a blocking thread, so a lookup is a
/// suspension point for the calling unit and never stalls the runtime.
#[derive(Clone)]
pub struct SharedRepository {
    inner: Arc<Mutex<Box<dyn DedupRepository>>>,
}

impl SharedRepository {
    pub fn new<R: DedupRepository + 'static>(repository: R) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(repository))),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryDedupRepository::new())
    }

    pub async fn find(
        &self,
        path: String,
        device_id: String,
    ) -> Result<Option<DedupRecord>, RepositoryError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let repository = inner.lock().map_err(|_| RepositoryError::Poisoned)?;
            repository.find(&path, &device_id)
        })
        .await?
    }

    pub async fn upsert(&self, record: DedupRecord) -> Result<(), RepositoryError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut repository = inner.lock().map_err(|_| RepositoryError::Poisoned)?;
            repository.upsert(&record)
        })
        .await?
    }
}

impl std::fmt::Debug for SharedRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRepository").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, device: &str, remote_id: u64) -> DedupRecord {
        DedupRecord {
            path: path.to_string(),
            device_id: device.to_string(),
            remote_id,
            remote_uuid: Some(format!("uuid-{remote_id}")),
            modified_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_memory_repository_keys_by_path_and_device() -> Result<(), RepositoryError> {
        let mut repo = MemoryDedupRepository::new();
        repo.upsert(&record("/data/a.txt", "laptop", 1))?;
        repo.upsert(&record("/data/a.txt", "desktop", 2))?;

        assert_eq!(repo.len(), 2);
        assert_eq!(repo.find("/data/a.txt", "laptop")?.unwrap().remote_id, 1);
        assert_eq!(repo.find("/data/a.txt", "desktop")?.unwrap().remote_id, 2);
        assert!(repo.find("/data/b.txt", "laptop")?.is_none());

        repo.upsert(&record("/data/a.txt", "laptop", 3))?;
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.find("/data/a.txt", "laptop")?.unwrap().remote_id, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_shared_repository_concurrent_upserts() -> Result<(), RepositoryError> {
        let shared = SharedRepository::in_memory();

        let mut handles = Vec::new();
        for i in 0..32u64 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                shared.upsert(record(&format!("/data/{i}"), "laptop", i)).await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        for i in 0..32u64 {
            let found = shared.find(format!("/data/{i}"), "laptop".to_string()).await?;
            assert_eq!(found.map(|r| r.remote_id), Some(i));
        }
        Ok(())
    }

    #[test]
    fn test_record_remote_ref() {
        let rec = record("/data/a.txt", "laptop", 9);
        assert_eq!(rec.remote_ref(), RemoteRef::new(9, Some("uuid-9".to_string())));
    }
}
