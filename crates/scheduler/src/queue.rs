//! Priority queue of pending task requests.
//!
//! Entries are ordered by `(score desc, created_at asc, seq asc)` where
//! `seq` is a monotonic submission counter, so equal scores resolve FIFO.
//! Cancellation tombstones entries in place; tombstoned entries are skipped
//! lazily on pop and excluded from the reported depth.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::task::{TaskPriority, TaskRequest};

/// Serializable view of one pending entry, for queue introspection.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedTaskInfo {
    pub task_id: String,
    pub project_id: String,
    pub priority: TaskPriority,
    pub score: f64,
    pub work_item_count: usize,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ── Priority score ───────────────────────────────────────────────────

/// Computed ordering key: priority base, deadline urgency, size penalty.
///
/// `base = level * 100`; a future deadline adds up to 100 as it closes in
/// (one point per hour under 100 hours out); an expired deadline adds a
/// flat 1000 so overdue tasks surface first; each work item shaves 0.1 so
/// small batches edge out large ones at equal priority.
pub fn priority_score(request: &TaskRequest, now: DateTime<Utc>) -> f64 {
    let mut score = request.priority.level() as f64 * 100.0;

    if let Some(deadline) = request.deadline {
        let remaining = deadline - now;
        if remaining > chrono::Duration::zero() {
            let hours = remaining.num_seconds() as f64 / 3600.0;
            score += (100.0 - hours).max(0.0);
        } else {
            score += 1000.0;
        }
    }

    score -= request.work_items.len() as f64 * 0.1;
    score
}

// ── Heap entry ───────────────────────────────────────────────────────

struct QueueEntry {
    request: TaskRequest,
    score: f64,
    enqueued_at: DateTime<Utc>,
    seq: u64,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.request.created_at.cmp(&self.request.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

// ── Queue ────────────────────────────────────────────────────────────

/// Pending-task queue. All access happens under the scheduler's lock, so
/// `cancel` is atomic with respect to `pop_ready`.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<QueueEntry>,
    queued_ids: HashSet<String>,
    tombstones: HashSet<String>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-tombstoned) entries.
    pub fn len(&self) -> usize {
        self.queued_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued_ids.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.queued_ids.contains(task_id)
    }

    /// Enqueue a request under the given score.
    pub fn push(&mut self, request: TaskRequest, score: f64) {
        self.queued_ids.insert(request.task_id.clone());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            request,
            score,
            enqueued_at: Utc::now(),
            seq,
        });
    }

    /// Pop the highest-priority request, but only if `can_place` says some
    /// worker could take it right now; otherwise the queue is left
    /// untouched. Tombstoned entries encountered on the way are discarded.
    pub fn pop_ready<F>(&mut self, can_place: F) -> Option<TaskRequest>
    where
        F: Fn(&TaskRequest) -> bool,
    {
        loop {
            let top_is_tombstone = match self.heap.peek() {
                Some(entry) => self.tombstones.contains(&entry.request.task_id),
                None => return None,
            };

            if top_is_tombstone {
                if let Some(entry) = self.heap.pop() {
                    self.tombstones.remove(&entry.request.task_id);
                }
                continue;
            }

            let placeable = self
                .heap
                .peek()
                .is_some_and(|entry| can_place(&entry.request));
            if !placeable {
                return None;
            }

            let entry = self.heap.pop()?;
            self.queued_ids.remove(&entry.request.task_id);
            return Some(entry.request);
        }
    }

    /// Tombstone a pending entry. Returns true iff the id was live in the
    /// queue.
    pub fn cancel(&mut self, task_id: &str) -> bool {
        if self.queued_ids.remove(task_id) {
            self.tombstones.insert(task_id.to_string());
            true
        } else {
            false
        }
    }

    /// Snapshot of live entries, highest priority first.
    pub fn pending(&self) -> Vec<QueuedTaskInfo> {
        let mut entries: Vec<&QueueEntry> = self
            .heap
            .iter()
            .filter(|entry| self.queued_ids.contains(&entry.request.task_id))
            .collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
            .into_iter()
            .map(|entry| QueuedTaskInfo {
                task_id: entry.request.task_id.clone(),
                project_id: entry.request.project_id.clone(),
                priority: entry.request.priority,
                score: entry.score,
                work_item_count: entry.request.work_items.len(),
                deadline: entry.request.deadline,
                created_at: entry.request.created_at,
            })
            .collect()
    }

    /// Tombstone every live entry enqueued before `cutoff` and return the
    /// affected requests (queue-wait bound enforcement).
    pub fn drain_expired(&mut self, cutoff: DateTime<Utc>) -> Vec<TaskRequest> {
        let mut expired = Vec::new();
        for entry in self.heap.iter() {
            if entry.enqueued_at < cutoff && self.queued_ids.contains(&entry.request.task_id) {
                expired.push(entry.request.clone());
            }
        }
        for request in &expired {
            self.queued_ids.remove(&request.task_id);
            self.tombstones.insert(request.task_id.clone());
        }
        expired
    }
}
