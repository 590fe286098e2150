//! Dependency-ordered execution of sync units.
//!
//! A subtree becomes a [`TaskGraph`]: one unit per node, each depending on
//! its parent's unit. [`WorkQueue`] runs the graph with a bounded number of
//! units in flight and only releases a unit once its parent has synced, so a
//! child never starts before its folder has a remote id.

use crate::engine::{NodeOutcome, NodeSyncer, SyncSource};
use crate::tree::{BackupTree, NodeId};
use crate::utils::errors::SyncError;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// One node's sync, with the unit (by graph index) that must finish first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit {
    pub node: NodeId,
    pub depends_on: Option<usize>,
}

#[derive(Debug, Default)]
pub struct TaskGraph {
    units: Vec<Unit>,
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit(&self, index: usize) -> Unit {
        self.units[index]
    }

    /// Units with no dependency; they are ready as soon as the run starts.
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, unit)| unit.depends_on.is_none())
            .map(|(index, _)| index)
    }

    pub fn dependents_of(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// Number of units that transitively wait on `index`
    pub fn descendant_count(&self, index: usize) -> usize {
        let mut count = 0;
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            for &dependent in &self.dependents[current] {
                count += 1;
                stack.push(dependent);
            }
        }
        count
    }

    fn push(&mut self, unit: Unit) -> usize {
        let index = self.units.len();
        if let Some(parent) = unit.depends_on {
            self.dependents[parent].push(index);
        }
        self.units.push(unit);
        self.dependents.push(Vec::new());
        index
    }
}

/// Build the task graph for `node` and everything below it.
///
/// The synthetic root has no unit of its own; its children start without a
/// dependency because the root is synced from the start. Any other starting
/// node gets a unit, and its descendants depend on their parents' units.
pub fn schedule_subtree(tree: &BackupTree, node: NodeId) -> TaskGraph {
    let mut graph = TaskGraph::default();
    let mut queue = VecDeque::new();

    if node == tree.root() {
        queue.extend(tree.children(node).into_iter().map(|child| (child, None)));
    } else {
        queue.push_back((node, None));
    }

    // Breadth-first, so a parent's unit always exists before its children's.
    while let Some((id, depends_on)) = queue.pop_front() {
        let index = graph.push(Unit {
            node: id,
            depends_on,
        });
        for child in tree.children(id) {
            queue.push_back((child, Some(index)));
        }
    }

    debug!(
        "Scheduled {} units under {}",
        graph.len(),
        if node == tree.root() {
            "root".to_string()
        } else {
            tree.get(node).local_id
        }
    );
    graph
}

/// A unit that ended without reaching `RemoteAndLocal` for a reason other
/// than cancellation.
#[derive(Debug)]
pub struct UnitFailure {
    pub node: NodeId,
    pub local_id: String,
    pub error: SyncError,
}

pub type ErrorCallback = Arc<dyn Fn(&UnitFailure) + Send + Sync>;

/// An error callback that ignores everything
pub fn ignore_errors() -> ErrorCallback {
    Arc::new(|_| {})
}

#[derive(Debug, Default)]
pub struct RunStats {
    pub deduplicated: usize,
    pub uploaded: usize,
    pub abandoned: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Units never attempted: their dependency did not sync, or the run was
    /// cancelled before they were dispatched.
    pub blocked: usize,
    pub storage_full: bool,
    pub failures: Vec<UnitFailure>,
}

impl RunStats {
    pub fn synced(&self) -> usize {
        self.deduplicated + self.uploaded
    }

    fn settled(&self) -> usize {
        self.synced() + self.abandoned + self.failed + self.cancelled
    }

    fn record_failure(&mut self, failure: UnitFailure, on_error: &ErrorCallback) {
        error!("Sync of {} failed: {}", failure.local_id, failure.error);
        on_error(&failure);
        self.failures.push(failure);
    }
}

/// Bounded-concurrency runner for a [`TaskGraph`].
#[derive(Debug, Clone, Copy)]
pub struct WorkQueue {
    limit: usize,
}

impl WorkQueue {
    /// `limit` is the maximum number of units in flight; at least one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn run(
        &self,
        tree: Arc<BackupTree>,
        syncer: NodeSyncer,
        graph: TaskGraph,
        on_error: ErrorCallback,
    ) -> RunStats {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let cancel = syncer.cancel_token().clone();
        let mut ready: VecDeque<usize> = graph.roots().collect();
        let mut running = FuturesUnordered::new();
        let mut stats = RunStats::default();

        info!(
            "Running {} sync units ({} at a time)",
            graph.len(),
            self.limit
        );

        loop {
            while let Some(index) = ready.pop_front() {
                if cancel.is_cancelled() {
                    break;
                }
                // Waiting for a permit is how the in-flight bound is enforced.
                let permit = tokio::select! {
                    permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };
                let Some(permit) = permit else {
                    break;
                };

                let node = graph.unit(index).node;
                let tree = Arc::clone(&tree);
                let syncer = syncer.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    syncer.sync_node(&tree, node).await
                });
                // The index travels outside the task so a panic still names its unit.
                running.push(handle.map(move |joined| (index, joined)));
            }

            let Some((index, joined)) = running.next().await else {
                break;
            };

            let node = graph.unit(index).node;
            let result = joined.unwrap_or_else(|e| Err(SyncError::Task(e)));
            match result {
                Ok(NodeOutcome::Synced(source)) => {
                    match source {
                        SyncSource::Dedup => stats.deduplicated += 1,
                        SyncSource::Upload => stats.uploaded += 1,
                    }
                    ready.extend(graph.dependents_of(index));
                }
                Ok(NodeOutcome::Abandoned { attempts }) => {
                    stats.abandoned += 1;
                    let local_id = tree.get(node).local_id;
                    let error = SyncError::RetriesExhausted {
                        local_id: local_id.clone(),
                        attempts,
                    };
                    stats.record_failure(
                        UnitFailure {
                            node,
                            local_id,
                            error,
                        },
                        &on_error,
                    );
                }
                Ok(NodeOutcome::Cancelled) => stats.cancelled += 1,
                Err(error) => {
                    stats.failed += 1;
                    stats.storage_full |= error.is_storage_full();
                    let local_id = tree.get(node).local_id;
                    stats.record_failure(
                        UnitFailure {
                            node,
                            local_id,
                            error,
                        },
                        &on_error,
                    );
                }
            }
        }

        stats.blocked = graph.len().saturating_sub(stats.settled());
        if stats.blocked > 0 {
            debug!("{} units were never attempted", stats.blocked);
        }
        stats
    }
}
