//! Resource dimensions and per-worker capacity accounting.
//!
//! The accountant is pure bookkeeping: all mutation happens under the
//! scheduler's lock, so these types carry no synchronization of their own.

use serde::{Deserialize, Serialize};

use crate::task::ResourceRequirement;

/// One axis of capacity accounting.
///
/// The numeric dimensions live in a [`ResourceVector`]; `TaskSlots` is
/// tracked on the worker node itself as the size of its assigned-task set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Network,
    ApiQuota,
    TaskSlots,
}

impl ResourceKind {
    /// Every dimension, slots included.
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Cpu,
        ResourceKind::Memory,
        ResourceKind::Network,
        ResourceKind::ApiQuota,
        ResourceKind::TaskSlots,
    ];

    /// The dimensions stored in a [`ResourceVector`].
    pub const NUMERIC: [ResourceKind; 4] = [
        ResourceKind::Cpu,
        ResourceKind::Memory,
        ResourceKind::Network,
        ResourceKind::ApiQuota,
    ];
}

/// Per-dimension amounts, used for both declared capacity and current load.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu_cores: f64,
    pub memory_mb: f64,
    pub network_mbps: f64,
    pub api_calls: f64,
}

impl ResourceVector {
    pub const fn new(cpu_cores: f64, memory_mb: f64, network_mbps: f64, api_calls: f64) -> Self {
        Self {
            cpu_cores,
            memory_mb,
            network_mbps,
            api_calls,
        }
    }

    /// Amount stored for a numeric dimension. Slot accounting lives on the
    /// worker node, so `TaskSlots` reads as zero here.
    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu_cores,
            ResourceKind::Memory => self.memory_mb,
            ResourceKind::Network => self.network_mbps,
            ResourceKind::ApiQuota => self.api_calls,
            ResourceKind::TaskSlots => 0.0,
        }
    }

    /// True iff adding `requirement` on top of this load stays within
    /// `capacity` on every numeric dimension.
    pub fn fits_within(&self, capacity: &ResourceVector, requirement: &ResourceRequirement) -> bool {
        self.cpu_cores + requirement.cpu_cores <= capacity.cpu_cores
            && self.memory_mb + requirement.memory_mb <= capacity.memory_mb
            && self.network_mbps + requirement.network_mbps <= capacity.network_mbps
            && self.api_calls + requirement.api_calls <= capacity.api_calls
    }

    /// Reserve the requirement: add per dimension.
    pub fn allocate(&mut self, requirement: &ResourceRequirement) {
        self.cpu_cores += requirement.cpu_cores;
        self.memory_mb += requirement.memory_mb;
        self.network_mbps += requirement.network_mbps;
        self.api_calls += requirement.api_calls;
    }

    /// Return the requirement: subtract per dimension, clamping at zero so a
    /// double release cannot drive the load negative.
    pub fn release(&mut self, requirement: &ResourceRequirement) {
        self.cpu_cores = (self.cpu_cores - requirement.cpu_cores).max(0.0);
        self.memory_mb = (self.memory_mb - requirement.memory_mb).max(0.0);
        self.network_mbps = (self.network_mbps - requirement.network_mbps).max(0.0);
        self.api_calls = (self.api_calls - requirement.api_calls).max(0.0);
    }

    /// Load ratio against a capacity vector for one dimension. Zero capacity
    /// reads as fully loaded so empty dimensions never look attractive.
    pub fn ratio(&self, capacity: &ResourceVector, kind: ResourceKind) -> f64 {
        let total = capacity.get(kind);
        if total <= 0.0 {
            return 1.0;
        }
        self.get(kind) / total
    }
}
