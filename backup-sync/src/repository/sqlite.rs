//! SQLite-backed dedup repository.

use super::{DedupRecord, DedupRepository};
use crate::utils::errors::RepositoryError;
use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dedup_records (
  path TEXT NOT NULL,
  device_id TEXT NOT NULL,
  remote_id INTEGER NOT NULL,
  modified_at_ms INTEGER NOT NULL,
  synced_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (path, device_id)
);

CREATE INDEX IF NOT EXISTS idx_dedup_records_device ON dedup_records(device_id);
"#;

pub struct SqliteDedupRepository {
    conn: Connection,
}

impl SqliteDedupRepository {
    /// Open (or create) the cache database at `path`
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = DELETE;
             PRAGMA synchronous = FULL;",
        )?;

        let repository = Self { conn };
        repository.migrate()?;
        info!("[DB] Dedup cache opened at {}", path.display());
        Ok(repository)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let repository = Self {
            conn: Connection::open_in_memory()?,
        };
        repository.migrate()?;
        Ok(repository)
    }

    /// Number of cached records
    pub fn len(&self) -> Result<usize, RepositoryError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM dedup_records", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }

    fn migrate(&self) -> Result<(), RepositoryError> {
        self.conn.execute_batch(SCHEMA)?;

        // Idempotent migrations for databases created by older versions
        if !self.has_column("dedup_records", "remote_uuid")? {
            self.conn
                .execute_batch("ALTER TABLE dedup_records ADD COLUMN remote_uuid TEXT")?;
        }

        Ok(())
    }

    fn has_column(&self, table: &str, column: &str) -> Result<bool, RepositoryError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns.iter().any(|c| c == column))
    }
}

impl DedupRepository for SqliteDedupRepository {
    fn find(&self, path: &str, device_id: &str) -> Result<Option<DedupRecord>, RepositoryError> {
        let row = self
            .conn
            .query_row(
                "SELECT remote_id, remote_uuid, modified_at_ms FROM dedup_records
                 WHERE path = ?1 AND device_id = ?2",
                params![path, device_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((remote_id, remote_uuid, modified_at_ms)) = row else {
            return Ok(None);
        };

        let remote_id = u64::try_from(remote_id)
            .map_err(|_| RepositoryError::InvalidRecord(format!("negative remote id for {path}")))?;
        let modified_at = DateTime::from_timestamp_millis(modified_at_ms).ok_or_else(|| {
            RepositoryError::InvalidRecord(format!("timestamp out of range for {path}"))
        })?;

        Ok(Some(DedupRecord {
            path: path.to_string(),
            device_id: device_id.to_string(),
            remote_id,
            remote_uuid,
            modified_at,
        }))
    }

    fn upsert(&mut self, record: &DedupRecord) -> Result<(), RepositoryError> {
        let remote_id = i64::try_from(record.remote_id).map_err(|_| {
            RepositoryError::InvalidRecord(format!("remote id too large for {}", record.path))
        })?;

        self.conn.execute(
            "INSERT INTO dedup_records (path, device_id, remote_id, remote_uuid, modified_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path, device_id) DO UPDATE SET
               remote_id = excluded.remote_id,
               remote_uuid = excluded.remote_uuid,
               modified_at_ms = excluded.modified_at_ms,
               synced_at = datetime('now')",
            params![
                record.path,
                record.device_id,
                remote_id,
                record.remote_uuid,
                record.modified_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(path: &str, remote_id: u64, modified_ms: i64) -> DedupRecord {
        DedupRecord {
            path: path.to_string(),
            device_id: "laptop".to_string(),
            remote_id,
            remote_uuid: Some(format!("uuid-{remote_id}")),
            modified_at: DateTime::from_timestamp_millis(modified_ms).unwrap(),
        }
    }

    #[test]
    fn test_find_miss() -> Result<(), RepositoryError> {
        let repo = SqliteDedupRepository::open_in_memory()?;
        assert!(repo.find("/data/a.txt", "laptop")?.is_none());
        assert!(repo.is_empty()?);
        Ok(())
    }

    #[test]
    fn test_upsert_then_update() -> Result<(), RepositoryError> {
        let mut repo = SqliteDedupRepository::open_in_memory()?;
        repo.upsert(&record("/data/a.txt", 1, 1_000))?;
        assert_eq!(repo.find("/data/a.txt", "laptop")?, Some(record("/data/a.txt", 1, 1_000)));

        repo.upsert(&record("/data/a.txt", 2, 2_500))?;
        assert_eq!(repo.len()?, 1);
        assert_eq!(repo.find("/data/a.txt", "laptop")?, Some(record("/data/a.txt", 2, 2_500)));
        assert!(repo.find("/data/a.txt", "desktop")?.is_none());
        Ok(())
    }

    #[test]
    fn test_missing_uuid_round_trips_as_none() -> Result<(), RepositoryError> {
        let mut repo = SqliteDedupRepository::open_in_memory()?;
        let mut rec = record("/data/folder", 4, 10);
        rec.remote_uuid = None;
        repo.upsert(&rec)?;
        assert_eq!(repo.find("/data/folder", "laptop")?.unwrap().remote_uuid, None);
        Ok(())
    }

    #[test]
    fn test_survives_reopen() -> Result<(), RepositoryError> {
        let dir = TempDir::new()?;
        let db_path = dir.path().join("nested/cache.db");

        {
            let mut repo = SqliteDedupRepository::open(&db_path)?;
            repo.upsert(&record("/data/a.txt", 7, 1_700_000_000_123))?;
        }

        let repo = SqliteDedupRepository::open(&db_path)?;
        let found = repo.find("/data/a.txt", "laptop")?.unwrap();
        assert_eq!(found.remote_id, 7);
        assert_eq!(found.modified_at.timestamp_millis(), 1_700_000_000_123);
        Ok(())
    }

    #[test]
    fn test_migration_adds_uuid_column() -> Result<(), RepositoryError> {
        let dir = TempDir::new()?;
        let db_path = dir.path().join("old.db");
        {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(
                "CREATE TABLE dedup_records (
                   path TEXT NOT NULL,
                   device_id TEXT NOT NULL,
                   remote_id INTEGER NOT NULL,
                   modified_at_ms INTEGER NOT NULL,
                   synced_at TEXT NOT NULL DEFAULT (datetime('now')),
                   PRIMARY KEY (path, device_id)
                 );
                 INSERT INTO dedup_records (path, device_id, remote_id, modified_at_ms)
                 VALUES ('/data/old.txt', 'laptop', 3, 500);",
            )?;
        }

        let repo = SqliteDedupRepository::open(&db_path)?;
        let found = repo.find("/data/old.txt", "laptop")?.unwrap();
        assert_eq!(found.remote_id, 3);
        assert_eq!(found.remote_uuid, None);
        Ok(())
    }
}
