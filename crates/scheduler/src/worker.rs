//! Worker nodes and the registry that owns them.
//!
//! The registry is a plain ordered map behind the scheduler's lock; FIFO
//! strategy semantics depend on iteration following registration order.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::resources::{ResourceKind, ResourceVector};
use crate::task::ResourceRequirement;

// ── Worker node ──────────────────────────────────────────────────────

/// A registered executor with declared capacity and current load.
///
/// Invariants, maintained by the accountant under the scheduler lock:
/// `0 <= load[dim] <= capacity[dim]` for every dimension, and
/// `assigned.len() <= max_concurrent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNode {
    pub worker_id: String,
    pub node_type: String,
    pub capacity: ResourceVector,
    pub load: ResourceVector,
    pub max_concurrent: usize,
    pub assigned: HashSet<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub active: bool,
}

impl WorkerNode {
    pub fn new(
        worker_id: impl Into<String>,
        node_type: impl Into<String>,
        capacity: ResourceVector,
        max_concurrent: usize,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            node_type: node_type.into(),
            capacity,
            load: ResourceVector::default(),
            max_concurrent,
            assigned: HashSet::new(),
            last_heartbeat: Utc::now(),
            active: true,
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.assigned.len() < self.max_concurrent
    }

    pub fn has_capacity_for(&self, requirement: &ResourceRequirement) -> bool {
        self.load.fits_within(&self.capacity, requirement)
    }

    pub fn allocate(&mut self, requirement: &ResourceRequirement) {
        self.load.allocate(requirement);
    }

    pub fn release(&mut self, requirement: &ResourceRequirement) {
        self.load.release(requirement);
    }

    /// Fraction of task slots in use.
    pub fn slot_ratio(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 1.0;
        }
        self.assigned.len() as f64 / self.max_concurrent as f64
    }

    /// Weighted load score used by the priority and load-balanced
    /// strategies: `0.3·cpu + 0.2·mem + 0.1·net + 0.4·slots`.
    pub fn load_score(&self) -> f64 {
        0.3 * self.load.ratio(&self.capacity, ResourceKind::Cpu)
            + 0.2 * self.load.ratio(&self.capacity, ResourceKind::Memory)
            + 0.1 * self.load.ratio(&self.capacity, ResourceKind::Network)
            + 0.4 * self.slot_ratio()
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// Owns the set of worker nodes, keyed by worker id.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    nodes: IndexMap<String, WorkerNode>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a node. Duplicate ids are rejected: re-registering would drop
    /// live bookkeeping (assigned tasks, allocated load) on the floor, so
    /// callers must unregister first.
    pub fn register(&mut self, node: WorkerNode) -> bool {
        if self.nodes.contains_key(&node.worker_id) {
            warn!(
                worker_id = %node.worker_id,
                "worker already registered, rejecting duplicate"
            );
            return false;
        }
        debug!(
            worker_id = %node.worker_id,
            node_type = %node.node_type,
            max_concurrent = node.max_concurrent,
            "worker registered"
        );
        self.nodes.insert(node.worker_id.clone(), node);
        true
    }

    /// Remove a node. Fails while tasks are still assigned to it.
    pub fn unregister(&mut self, worker_id: &str) -> bool {
        match self.nodes.get(worker_id) {
            Some(node) if !node.assigned.is_empty() => {
                warn!(
                    worker_id,
                    assigned = node.assigned.len(),
                    "worker still has assigned tasks, refusing to unregister"
                );
                false
            }
            Some(_) => {
                self.nodes.shift_remove(worker_id);
                debug!(worker_id, "worker unregistered");
                true
            }
            None => {
                warn!(worker_id, "unknown worker, nothing to unregister");
                false
            }
        }
    }

    pub fn get(&self, worker_id: &str) -> Option<&WorkerNode> {
        self.nodes.get(worker_id)
    }

    pub fn get_mut(&mut self, worker_id: &str) -> Option<&mut WorkerNode> {
        self.nodes.get_mut(worker_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &WorkerNode> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut WorkerNode> {
        self.nodes.values_mut()
    }

    pub fn active_count(&self) -> usize {
        self.nodes.values().filter(|n| n.active).count()
    }

    /// Stamp a heartbeat: refresh the timestamp, re-activate the node, and
    /// reconcile externally reported usage into the load (clamped into
    /// `[0, capacity]` so the accounting invariant holds).
    pub fn update_heartbeat(
        &mut self,
        worker_id: &str,
        usage: Option<&ResourceVector>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(node) = self.nodes.get_mut(worker_id) else {
            warn!(worker_id, "heartbeat for unknown worker");
            return false;
        };
        node.last_heartbeat = now;
        node.active = true;
        if let Some(usage) = usage {
            node.load = ResourceVector::new(
                usage.cpu_cores.clamp(0.0, node.capacity.cpu_cores),
                usage.memory_mb.clamp(0.0, node.capacity.memory_mb),
                usage.network_mbps.clamp(0.0, node.capacity.network_mbps),
                usage.api_calls.clamp(0.0, node.capacity.api_calls),
            );
        }
        debug!(worker_id, "heartbeat updated");
        true
    }

    /// Active workers with a spare slot and room for the requirement, in
    /// registration order.
    pub fn find_suitable(&self, requirement: &ResourceRequirement) -> Vec<String> {
        self.nodes
            .values()
            .filter(|node| node.active && node.has_free_slot() && node.has_capacity_for(requirement))
            .map(|node| node.worker_id.clone())
            .collect()
    }

    /// Aggregate load/capacity ratio per dimension across active workers.
    pub fn utilization(&self) -> BTreeMap<ResourceKind, f64> {
        let mut out = BTreeMap::new();
        for kind in ResourceKind::ALL {
            let (mut used, mut total) = (0.0, 0.0);
            for node in self.nodes.values().filter(|n| n.active) {
                match kind {
                    ResourceKind::TaskSlots => {
                        used += node.assigned.len() as f64;
                        total += node.max_concurrent as f64;
                    }
                    numeric => {
                        used += node.load.get(numeric);
                        total += node.capacity.get(numeric);
                    }
                }
            }
            if total > 0.0 {
                out.insert(kind, used / total);
            }
        }
        out
    }
}
