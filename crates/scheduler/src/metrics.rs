//! Scheduler statistics and status snapshots.
//!
//! The collector is a plain struct mutated under the scheduler's lock;
//! [`SchedulerStatus`] is the serializable view handed to callers.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::resources::ResourceKind;
use crate::task::TaskRequest;

// ── Collector ────────────────────────────────────────────────────────

/// Accumulated counters, updated by the coordinator as tasks move through
/// their lifecycle.
#[derive(Debug, Default)]
pub struct StatsCollector {
    submitted: u64,
    dispatched: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    retries: u64,
    expired: u64,
    queue_wait_total_secs: f64,
    processing_total_secs: f64,
    priority_distribution: BTreeMap<&'static str, u64>,
    category_distribution: BTreeMap<String, u64>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&mut self, request: &TaskRequest) {
        self.submitted += 1;
        *self
            .priority_distribution
            .entry(request.priority.as_str())
            .or_insert(0) += 1;
        for category in &request.target_categories {
            *self
                .category_distribution
                .entry(category.clone())
                .or_insert(0) += 1;
        }
    }

    pub fn record_dispatched(&mut self, queue_wait_secs: f64) {
        self.dispatched += 1;
        self.queue_wait_total_secs += queue_wait_secs.max(0.0);
    }

    pub fn record_completed(&mut self, processing_secs: f64) {
        self.completed += 1;
        self.processing_total_secs += processing_secs.max(0.0);
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn record_cancelled(&mut self) {
        self.cancelled += 1;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// A task failed by the queue-wait bound counts as both expired and
    /// failed.
    pub fn record_expired(&mut self) {
        self.expired += 1;
        self.failed += 1;
    }

    /// Zero every counter and distribution.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted,
            dispatched: self.dispatched,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            retries: self.retries,
            expired: self.expired,
            avg_queue_wait_secs: average(self.queue_wait_total_secs, self.dispatched),
            avg_processing_secs: average(self.processing_total_secs, self.completed),
            priority_distribution: self
                .priority_distribution
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            category_distribution: self.category_distribution.clone(),
        }
    }
}

fn average(total: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

// ── Snapshots ────────────────────────────────────────────────────────

/// JSON-serializable counter block.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub expired: u64,
    pub avg_queue_wait_secs: f64,
    pub avg_processing_secs: f64,
    pub priority_distribution: BTreeMap<String, u64>,
    pub category_distribution: BTreeMap<String, u64>,
}

/// Per-worker slice of a status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatusSnapshot {
    pub worker_id: String,
    pub node_type: String,
    pub active: bool,
    pub assigned: usize,
    pub max_concurrent: usize,
    pub load_pct: f64,
}

/// Complete scheduler status returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub scheduler_id: String,
    pub running: bool,
    pub strategy: String,
    pub queue_depth: usize,
    pub running_count: usize,
    pub active_workers: usize,
    pub workers: Vec<WorkerStatusSnapshot>,
    pub utilization: BTreeMap<ResourceKind, f64>,
    pub counters: StatsSnapshot,
}
