//! Backup run orchestration.
//!
//! A run snapshots the local tree, sets the progress total, schedules every
//! node under the root and drives the graph to completion, then summarises
//! the outcome in a [`BackupReport`].

use crate::config::Config;
use crate::engine::retry::{Backoff, RetryPolicy, TokioBackoff};
use crate::engine::NodeSyncer;
use crate::fs::walker::{SkippedEntry, WalkOptions};
use crate::progress::{format_duration, Progress};
use crate::remote::{RemoteRef, RemoteUploader};
use crate::repository::SharedRepository;
use crate::scheduler::{ignore_errors, schedule_subtree, ErrorCallback, UnitFailure, WorkQueue};
use crate::tree::{generate_tree, BackupTree};
use crate::utils::errors::BackupError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Default number of sync units in flight
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// What to back up and where it lands remotely
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub root: PathBuf,
    pub device_id: String,
    /// Remote folder the root's children are created under
    pub root_ref: RemoteRef,
    pub walk: WalkOptions,
}

impl BackupJob {
    pub fn new(root: impl Into<PathBuf>, device_id: impl Into<String>, root_ref: RemoteRef) -> Self {
        Self {
            root: root.into(),
            device_id: device_id.into(),
            root_ref,
            walk: WalkOptions::default(),
        }
    }

    pub fn from_config(config: &Config, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            device_id: config.device.id.clone(),
            root_ref: config.remote.root_ref(),
            walk: config.sync.walk_options(),
        }
    }

    pub fn with_walk_options(mut self, walk: WalkOptions) -> Self {
        self.walk = walk;
        self
    }
}

/// Outcome of one backup run
#[derive(Debug)]
pub struct BackupReport {
    pub run_id: Uuid,
    pub root: PathBuf,
    /// Nodes taking part in the run (the synthetic root excluded)
    pub total: usize,
    /// Nodes that reached `RemoteAndLocal`
    pub completed: usize,
    pub uploaded: usize,
    pub deduplicated: usize,
    pub abandoned: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    pub storage_full: bool,
    pub failures: Vec<UnitFailure>,
    /// Local entries the snapshot could not include; they are not in `total`
    pub skipped: Vec<SkippedEntry>,
    pub duration: Duration,
    pub tree: Arc<BackupTree>,
}

impl BackupReport {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.completed as f64 / self.total as f64).min(1.0)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total && self.skipped.is_empty()
    }
}

/// Main backup executor
pub struct BackupExecutor {
    repository: SharedRepository,
    remote: Arc<dyn RemoteUploader>,
    progress: Progress,
    policy: RetryPolicy,
    backoff: Arc<dyn Backoff>,
    max_concurrent: usize,
    on_error: ErrorCallback,
    cancel_token: CancellationToken,
}

impl BackupExecutor {
    pub fn new(repository: SharedRepository, remote: Arc<dyn RemoteUploader>) -> Self {
        Self {
            repository,
            remote,
            progress: Progress::new(),
            policy: RetryPolicy::default(),
            backoff: Arc::new(TokioBackoff),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            on_error: ignore_errors(),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn from_config(
        config: &Config,
        repository: SharedRepository,
        remote: Arc<dyn RemoteUploader>,
    ) -> Self {
        Self::new(repository, remote)
            .with_policy(config.sync.retry_policy())
            .with_max_concurrent(config.sync.max_concurrent)
    }

    pub fn with_cancel(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_error_callback(mut self, on_error: ErrorCallback) -> Self {
        self.on_error = on_error;
        self
    }

    /// Shared progress counter; hand clones to reporters before `execute`.
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Execute a backup job
    pub async fn execute(&self, job: BackupJob) -> Result<BackupReport, BackupError> {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4();

        info!(
            "Starting backup run {} of {} (device: {}, concurrency: {})",
            run_id,
            job.root.display(),
            job.device_id,
            self.max_concurrent
        );

        // Walking is blocking filesystem work
        let root = job.root.clone();
        let tree = tokio::task::spawn_blocking(move || {
            generate_tree(&job.root, &job.walk, &job.device_id, job.root_ref)
        })
        .await??;
        let tree = Arc::new(tree);

        self.progress.begin(tree.syncable_count());

        let syncer = NodeSyncer::new(
            self.repository.clone(),
            Arc::clone(&self.remote),
            self.progress.clone(),
        )
        .with_policy(self.policy)
        .with_backoff(Arc::clone(&self.backoff))
        .with_cancel(self.cancel_token.clone());

        let graph = schedule_subtree(&tree, tree.root());
        let stats = WorkQueue::new(self.max_concurrent)
            .run(Arc::clone(&tree), syncer, graph, Arc::clone(&self.on_error))
            .await;

        let duration = start_time.elapsed();
        let snapshot = self.progress.snapshot();

        if stats.storage_full {
            warn!(
                "Remote storage is full; backup of {} is incomplete",
                root.display()
            );
        }
        if !tree.skipped().is_empty() {
            warn!(
                "{} local entries under {} were left out of the backup",
                tree.skipped().len(),
                root.display()
            );
        }
        if self.cancel_token.is_cancelled() {
            info!(
                "Backup run {} cancelled: {} of {} nodes synced",
                run_id, snapshot.completed, snapshot.total
            );
        }

        info!(
            "Backup run {} finished in {}: {}/{} synced ({} uploaded, {} deduplicated), {} abandoned, {} failed, {} blocked",
            run_id,
            format_duration(duration.as_secs()),
            snapshot.completed,
            snapshot.total,
            stats.uploaded,
            stats.deduplicated,
            stats.abandoned,
            stats.failed,
            stats.blocked
        );

        Ok(BackupReport {
            run_id,
            root,
            total: snapshot.total,
            completed: snapshot.completed,
            uploaded: stats.uploaded,
            deduplicated: stats.deduplicated,
            abandoned: stats.abandoned,
            failed: stats.failed,
            blocked: stats.blocked,
            cancelled: stats.cancelled,
            storage_full: stats.storage_full,
            failures: stats.failures,
            skipped: tree.skipped().to_vec(),
            duration,
            tree,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SqliteDedupRepository;
    use crate::testutil::{
        fixture_dir, Failure, MockRemote, RecordingBackoff, DEVICE_ID, ROOT_REMOTE_ID,
    };
    use crate::tree::SyncStatus;
    use std::sync::Mutex;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn job(dir: &TempDir) -> BackupJob {
        BackupJob::new(dir.path(), DEVICE_ID, RemoteRef::new(ROOT_REMOTE_ID, None))
    }

    fn executor(repository: SharedRepository, remote: Arc<MockRemote>) -> BackupExecutor {
        BackupExecutor::new(repository, remote)
            .with_policy(RetryPolicy::new(3, Duration::from_millis(1)))
            .with_backoff(Arc::new(RecordingBackoff::default()))
            .with_max_concurrent(4)
    }

    #[test]
    fn test_backup_job_from_config() {
        let mut config = Config::default();
        config.device.id = "laptop".to_string();
        config.remote.root_folder_id = 42;

        let job = BackupJob::from_config(&config, "/data");

        assert_eq!(job.root, PathBuf::from("/data"));
        assert_eq!(job.device_id, "laptop");
        assert_eq!(job.root_ref.id, 42);
        assert_eq!(job.walk.exclude_patterns, config.sync.exclude_patterns);
    }

    #[tokio::test]
    async fn test_fresh_tree_uploads_everything_in_order() {
        let dir = fixture_dir();
        let remote = Arc::new(MockRemote::new());
        let executor = executor(SharedRepository::in_memory(), remote.clone());

        let report = executor.execute(job(&dir)).await.unwrap();

        assert_eq!(remote.calls().len(), 3);
        assert!(remote.finished_before_started("b", "b/c.txt"));
        assert_eq!(report.total, 3);
        assert_eq!(report.completed, 3);
        assert_eq!(report.uploaded, 3);
        assert!(report.is_complete());
        assert_eq!(report.fraction(), 1.0);
        assert!(executor.progress().is_complete());

        let folder_id = report.tree.get(report.tree.find("b").unwrap()).remote_id();
        let child = report.tree.get(report.tree.find("b/c.txt").unwrap());
        assert_eq!(child.remote_parent_id(), folder_id);
    }

    #[tokio::test]
    async fn test_second_run_skips_unchanged_content() {
        let dir = fixture_dir();
        let db = TempDir::new().unwrap();
        let db_path = db.path().join("dedup.db");

        let first_remote = Arc::new(MockRemote::new());
        let repository = SharedRepository::new(SqliteDedupRepository::open(&db_path).unwrap());
        let first = executor(repository, first_remote.clone())
            .execute(job(&dir))
            .await
            .unwrap();
        assert_eq!(first.uploaded, 3);

        let second_remote = Arc::new(MockRemote::new());
        let repository = SharedRepository::new(SqliteDedupRepository::open(&db_path).unwrap());
        let second = executor(repository, second_remote.clone())
            .execute(job(&dir))
            .await
            .unwrap();

        assert!(second_remote.calls().is_empty());
        assert_eq!(second.deduplicated, 3);
        assert_eq!(second.completed, second.total);
        for id in ["a.txt", "b", "b/c.txt"] {
            let before = first.tree.get(first.tree.find(id).unwrap());
            let after = second.tree.get(second.tree.find(id).unwrap());
            assert_eq!(after.remote_id(), before.remote_id());
        }
    }

    #[tokio::test]
    async fn test_modified_file_is_reuploaded() {
        let dir = fixture_dir();
        let repository = SharedRepository::in_memory();
        executor(repository.clone(), Arc::new(MockRemote::new()))
            .execute(job(&dir))
            .await
            .unwrap();

        let file = std::fs::File::options()
            .write(true)
            .open(dir.path().join("a.txt"))
            .unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        let remote = Arc::new(MockRemote::new());
        let report = executor(repository, remote.clone())
            .execute(job(&dir))
            .await
            .unwrap();

        let calls = remote.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].local_id, "a.txt");
        assert_eq!(calls[0].status, SyncStatus::NeedsUpdate);
        assert!(calls[0].previous.is_some());
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.deduplicated, 2);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_run_incomplete() {
        let dir = fixture_dir();
        let remote = Arc::new(MockRemote::new().fail_always("b", Failure::Transient));

        let report = executor(SharedRepository::in_memory(), remote.clone())
            .execute(job(&dir))
            .await
            .unwrap();

        assert_eq!(remote.calls_for("b"), 4);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.blocked, 1);
        assert_eq!(report.completed, 1);
        assert!(!report.is_complete());
        assert!(report.fraction() < 1.0);
        let child = report.tree.get(report.tree.find("b/c.txt").unwrap());
        assert_eq!(child.status(), SyncStatus::LocalOnly);
    }

    #[tokio::test]
    async fn test_storage_full_is_reported() {
        let dir = fixture_dir();
        let remote = Arc::new(MockRemote::new().fail_always("a.txt", Failure::StorageFull));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let report = executor(SharedRepository::in_memory(), remote.clone())
            .with_error_callback(Arc::new(move |failure: &UnitFailure| {
                sink.lock().unwrap().push(failure.error.is_storage_full());
            }))
            .execute(job(&dir))
            .await
            .unwrap();

        assert!(report.storage_full);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].local_id, "a.txt");
        assert_eq!(remote.calls_for("a.txt"), 1);
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(MockRemote::new());

        let report = executor(SharedRepository::in_memory(), remote.clone())
            .execute(job(&dir))
            .await
            .unwrap();

        assert_eq!(report.total, 0);
        assert_eq!(report.fraction(), 1.0);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_non_utf8_names_are_reported_not_merged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ok.txt"), b"fine").unwrap();
        // Same content, and names that only differ in their invalid byte
        std::fs::write(dir.path().join(OsStr::from_bytes(b"x\xfe")), b"same").unwrap();
        std::fs::write(dir.path().join(OsStr::from_bytes(b"x\xff")), b"same").unwrap();
        let remote = Arc::new(MockRemote::new());

        let report = executor(SharedRepository::in_memory(), remote.clone())
            .execute(job(&dir))
            .await
            .unwrap();

        let uploaded: Vec<String> = remote.calls().into_iter().map(|c| c.local_id).collect();
        assert_eq!(uploaded, vec!["ok.txt".to_string()]);
        assert_eq!(report.total, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.deduplicated, 0);
        assert_eq!(report.skipped.len(), 2);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_missing_root_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let job = BackupJob::new(
            dir.path().join("missing"),
            DEVICE_ID,
            RemoteRef::new(ROOT_REMOTE_ID, None),
        );

        let result = executor(SharedRepository::in_memory(), Arc::new(MockRemote::new()))
            .execute(job)
            .await;

        assert!(matches!(result, Err(BackupError::Filesystem { .. })));
    }
}
