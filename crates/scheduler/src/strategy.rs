//! Worker-selection policies.
//!
//! Each policy is one implementation of [`SchedulingStrategy`]; the
//! scheduler holds the active policy as a trait object and swaps it at
//! runtime via [`StrategyKind`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskRequest;
use crate::worker::WorkerRegistry;

// ── Decision ─────────────────────────────────────────────────────────

/// Outcome of one dispatch attempt. Ephemeral: computed per attempt, never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulingDecision {
    pub task_id: String,
    pub worker_id: Option<String>,
    pub estimated_start: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub reason: String,
    pub confidence: f64,
}

// ── Strategy trait ───────────────────────────────────────────────────

/// A policy for picking one worker among the suitable candidates.
///
/// `select` takes `&mut self` because some policies (round-robin) carry a
/// cursor that advances on every call.
pub trait SchedulingStrategy: Send {
    fn name(&self) -> &'static str;

    /// Pick a worker id from `candidates` (already filtered to active
    /// workers with room). Returns `None` only when `candidates` is empty.
    fn select(&mut self, registry: &WorkerRegistry, candidates: &[String]) -> Option<String>;
}

/// Build a [`SchedulingDecision`] for one dispatch attempt.
pub fn make_decision(
    strategy: &mut dyn SchedulingStrategy,
    registry: &WorkerRegistry,
    task: &TaskRequest,
    now: DateTime<Utc>,
) -> SchedulingDecision {
    let candidates = registry.find_suitable(&task.requirement);
    match strategy.select(registry, &candidates) {
        Some(worker_id) => {
            let estimated = chrono::Duration::from_std(task.requirement.estimated_duration())
                .unwrap_or_else(|_| chrono::Duration::zero());
            SchedulingDecision {
                task_id: task.task_id.clone(),
                reason: format!("assigned to '{}' by {} strategy", worker_id, strategy.name()),
                worker_id: Some(worker_id),
                estimated_start: Some(now),
                estimated_completion: Some(now + estimated),
                confidence: 0.8,
            }
        }
        None => SchedulingDecision {
            task_id: task.task_id.clone(),
            worker_id: None,
            estimated_start: None,
            estimated_completion: None,
            reason: "no suitable worker available".into(),
            confidence: 0.0,
        },
    }
}

// ── Policies ─────────────────────────────────────────────────────────

/// Lowest weighted load score wins; ties resolve to the earliest-registered
/// candidate.
#[derive(Debug, Default)]
pub struct PriorityStrategy;

impl SchedulingStrategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select(&mut self, registry: &WorkerRegistry, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .min_by(|a, b| load_of(registry, a).total_cmp(&load_of(registry, b)))
            .cloned()
    }
}

/// Same load formula as [`PriorityStrategy`], but ties break explicitly on
/// worker id for determinism independent of registration order.
#[derive(Debug, Default)]
pub struct LoadBalancedStrategy;

impl SchedulingStrategy for LoadBalancedStrategy {
    fn name(&self) -> &'static str {
        "load_balanced"
    }

    fn select(&mut self, registry: &WorkerRegistry, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .min_by(|a, b| {
                load_of(registry, a)
                    .total_cmp(&load_of(registry, b))
                    .then_with(|| a.cmp(b))
            })
            .cloned()
    }
}

/// Cyclic cursor over the candidate list; the cursor advances on every call
/// regardless of outcome.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursor: usize,
}

impl SchedulingStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&mut self, _registry: &WorkerRegistry, candidates: &[String]) -> Option<String> {
        let position = self.cursor;
        self.cursor = self.cursor.wrapping_add(1);
        if candidates.is_empty() {
            return None;
        }
        candidates.get(position % candidates.len()).cloned()
    }
}

/// First suitable worker in registry iteration order.
#[derive(Debug, Default)]
pub struct FifoStrategy;

impl SchedulingStrategy for FifoStrategy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select(&mut self, _registry: &WorkerRegistry, candidates: &[String]) -> Option<String> {
        candidates.first().cloned()
    }
}

fn load_of(registry: &WorkerRegistry, worker_id: &str) -> f64 {
    registry
        .get(worker_id)
        .map(|node| node.load_score())
        .unwrap_or(f64::INFINITY)
}

// ── Kind selector ────────────────────────────────────────────────────

/// Serializable selector for the active policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Fifo,
    Priority,
    RoundRobin,
    LoadBalanced,
}

impl StrategyKind {
    pub fn build(self) -> Box<dyn SchedulingStrategy + Send> {
        match self {
            StrategyKind::Fifo => Box::new(FifoStrategy),
            StrategyKind::Priority => Box::new(PriorityStrategy),
            StrategyKind::RoundRobin => Box::<RoundRobinStrategy>::default(),
            StrategyKind::LoadBalanced => Box::new(LoadBalancedStrategy),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Fifo => "fifo",
            StrategyKind::Priority => "priority",
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::LoadBalanced => "load_balanced",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(StrategyKind::Fifo),
            "priority" => Ok(StrategyKind::Priority),
            "round_robin" => Ok(StrategyKind::RoundRobin),
            "load_balanced" => Ok(StrategyKind::LoadBalanced),
            other => Err(format!("unknown scheduling strategy: {other}")),
        }
    }
}
