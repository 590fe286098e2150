//! Run-level progress: how many nodes reached `RemoteAndLocal` out of the snapshot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Point-in-time view of a run's progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
}

impl ProgressSnapshot {
    /// Fraction complete in `0.0..=1.0`; an empty run counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.completed as f64 / self.total as f64).min(1.0)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Shared completed/total counter.
///
/// Cloning is cheap; all clones update the same counter. Writes go through
/// the watch channel's lock, so concurrent increments never get lost and
/// observers always see a consistent pair.
#[derive(Debug, Clone)]
pub struct Progress {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Progress {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Start a run over `total` nodes
    pub fn begin(&self, total: usize) {
        self.tx.send_replace(ProgressSnapshot {
            completed: 0,
            total,
        });
    }

    /// Count one node as completed
    pub fn increment(&self) {
        self.tx.send_modify(|snapshot| snapshot.completed += 1);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.tx.borrow()
    }

    pub fn fraction(&self) -> f64 {
        self.snapshot().fraction()
    }

    pub fn is_complete(&self) -> bool {
        self.snapshot().is_complete()
    }

    /// Observe progress changes (read-only)
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Log progress on an interval until `cancel` fires.
pub fn spawn_reporter(
    progress: Progress,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut last = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => { break; }
            }

            let snapshot = progress.snapshot();
            if last == Some(snapshot) || snapshot.total == 0 {
                continue;
            }
            last = Some(snapshot);

            info!(
                "Progress: {}/{} nodes ({:.1}%)",
                snapshot.completed,
                snapshot.total,
                snapshot.fraction() * 100.0
            );
        }
    })
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
