//! Test doubles shared by the engine, scheduler and executor tests.

use crate::engine::retry::Backoff;
use crate::fs::walker::WalkOptions;
use crate::remote::{RemoteRef, RemoteUploader, UploadRequest};
use crate::tree::{generate_tree, BackupTree, SyncStatus};
use crate::utils::errors::UploadError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

pub(crate) const ROOT_REMOTE_ID: u64 = 10;
pub(crate) const DEVICE_ID: &str = "device-1";

/// What the mock saw when `upload` was called
#[derive(Debug, Clone)]
pub(crate) struct UploadCall {
    pub local_id: String,
    pub status: SyncStatus,
    pub remote_parent_id: Option<u64>,
    pub parent_id: u64,
    pub previous: Option<RemoteRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Started(String),
    Finished(String),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Transient,
    StorageFull,
    /// Never completes; only cancellation gets the caller out
    Hang,
    /// Panics inside the upload task
    Panic,
}

/// Scripted uploader: succeeds with fresh ids unless told to fail for a node.
pub(crate) struct MockRemote {
    next_id: AtomicU64,
    calls: Mutex<Vec<UploadCall>>,
    events: Mutex<Vec<Event>>,
    // local id -> (failure, remaining failures; None = every time)
    failures: Mutex<HashMap<String, (Failure, Option<usize>)>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every upload takes at least `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Highest number of uploads seen running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_always(self, local_id: &str, failure: Failure) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(local_id.to_string(), (failure, None));
        self
    }

    pub fn fail_times(self, local_id: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(local_id.to_string(), (Failure::Transient, Some(times)));
        self
    }

    pub fn calls(&self) -> Vec<UploadCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, local_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.local_id == local_id)
            .count()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// True when `first` finished successfully before `second` was started
    pub fn finished_before_started(&self, first: &str, second: &str) -> bool {
        let events = self.events();
        let finished = events
            .iter()
            .position(|e| *e == Event::Finished(first.to_string()));
        let started = events
            .iter()
            .position(|e| *e == Event::Started(second.to_string()));
        matches!((finished, started), (Some(f), Some(s)) if f < s)
    }

    fn scripted_failure(&self, local_id: &str) -> Option<Failure> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(local_id) {
            Some((failure, None)) => Some(*failure),
            Some((failure, Some(remaining))) if *remaining > 0 => {
                *remaining -= 1;
                Some(*failure)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl RemoteUploader for MockRemote {
    async fn upload(&self, request: UploadRequest<'_>) -> Result<RemoteRef, UploadError> {
        let local_id = request.node.local_id.clone();
        self.calls.lock().unwrap().push(UploadCall {
            local_id: local_id.clone(),
            status: request.node.status(),
            remote_parent_id: request.node.remote_parent_id(),
            parent_id: request.parent_id,
            previous: request.previous.map(|p| p.remote_ref()),
        });
        self.events
            .lock()
            .unwrap()
            .push(Event::Started(local_id.clone()));

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        // Let sibling units interleave
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        match self.scripted_failure(&local_id) {
            Some(Failure::Transient) => {
                return Err(UploadError::Rejected {
                    status: 503,
                    message: "service unavailable".to_string(),
                })
            }
            Some(Failure::StorageFull) => {
                return Err(UploadError::Rejected {
                    status: crate::remote::STORAGE_FULL_STATUS,
                    message: "max space used".to_string(),
                })
            }
            Some(Failure::Hang) => {
                return std::future::pending::<Result<RemoteRef, UploadError>>().await;
            }
            Some(Failure::Panic) => panic!("upload of {local_id} blew up"),
            None => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(Event::Finished(local_id));
        Ok(RemoteRef::new(id, Some(format!("uuid-{id}"))))
    }
}

/// Records requested delays instead of sleeping
#[derive(Default)]
pub(crate) struct RecordingBackoff {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingBackoff {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backoff for RecordingBackoff {
    async fn wait(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}

/// `a.txt`, `b/`, `b/c.txt` on disk
pub(crate) fn fixture_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
    fs::create_dir(dir.path().join("b")).unwrap();
    fs::write(dir.path().join("b/c.txt"), b"charlie").unwrap();
    dir
}

pub(crate) fn snapshot(dir: &TempDir) -> BackupTree {
    generate_tree(
        dir.path(),
        &WalkOptions::default(),
        DEVICE_ID,
        RemoteRef::new(ROOT_REMOTE_ID, None),
    )
    .unwrap()
}

/// Dedup key of a node, as the engine computes it
pub(crate) fn path_key(tree: &BackupTree, relative: &str) -> String {
    let node = tree.get(tree.find(relative).unwrap());
    node.path.unwrap().to_str().unwrap().to_string()
}
