//! Task request and result types.
//!
//! A [`TaskRequest`] is immutable after submission; the matching
//! [`TaskResult`] is created at submission time and mutated only by the
//! execution coordinator.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;

// ── Priority and status ──────────────────────────────────────────────

/// Task priority levels, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
    Critical = 5,
}

impl TaskPriority {
    /// Ordinal used as the base of the priority score.
    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
            TaskPriority::Critical => "critical",
        }
    }
}

/// Lifecycle states of a task.
///
/// `Pending → Queued → Running → {Completed | Failed | Cancelled}`, with
/// `Retrying` between a failed attempt and its re-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    /// Terminal states are never left again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

// ── Work items and resource requirements ─────────────────────────────

/// One ordered unit of work inside a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub index: u32,
    pub content: String,
}

impl WorkItem {
    pub fn new(index: u32, content: impl Into<String>) -> Self {
        Self {
            index,
            content: content.into(),
        }
    }
}

/// Resources a task needs while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: f64,

    #[serde(default = "default_memory_mb")]
    pub memory_mb: f64,

    #[serde(default = "default_network_mbps")]
    pub network_mbps: f64,

    #[serde(default = "default_api_calls")]
    pub api_calls: f64,

    /// Advisory runtime estimate used for completion-time projection;
    /// never enforced as a timeout.
    #[serde(default = "default_estimated_secs")]
    pub estimated_duration_secs: f64,
}

fn default_cpu_cores() -> f64 {
    1.0
}

fn default_memory_mb() -> f64 {
    512.0
}

fn default_network_mbps() -> f64 {
    10.0
}

fn default_api_calls() -> f64 {
    1.0
}

fn default_estimated_secs() -> f64 {
    30.0
}

impl Default for ResourceRequirement {
    fn default() -> Self {
        Self {
            cpu_cores: default_cpu_cores(),
            memory_mb: default_memory_mb(),
            network_mbps: default_network_mbps(),
            api_calls: default_api_calls(),
            estimated_duration_secs: default_estimated_secs(),
        }
    }
}

impl ResourceRequirement {
    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs_f64(self.estimated_duration_secs.max(0.0))
    }
}

// ── Task request ─────────────────────────────────────────────────────

/// Callback invoked with the final result when a task completes.
///
/// Panics inside the callback are caught and logged, never propagated.
pub type CompletionCallback = Arc<dyn Fn(&TaskResult) + Send + Sync>;

/// A unit of submitted work. Immutable after submission; cancellation is
/// tracked on the scheduler side, not on the request.
#[derive(Clone)]
pub struct TaskRequest {
    pub task_id: String,
    pub project_id: String,
    pub work_items: Vec<WorkItem>,
    pub target_categories: Vec<String>,
    pub priority: TaskPriority,
    pub deadline: Option<DateTime<Utc>>,
    pub requirement: ResourceRequirement,
    pub callback: Option<CompletionCallback>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRequest")
            .field("task_id", &self.task_id)
            .field("project_id", &self.project_id)
            .field("work_items", &self.work_items.len())
            .field("target_categories", &self.target_categories)
            .field("priority", &self.priority)
            .field("deadline", &self.deadline)
            .field("requirement", &self.requirement)
            .field("has_callback", &self.callback.is_some())
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl TaskRequest {
    /// Start building a request for the given project. The task id defaults
    /// to a fresh UUID.
    pub fn builder(project_id: impl Into<String>) -> TaskRequestBuilder {
        TaskRequestBuilder::new(project_id)
    }

    /// Synchronous submit-time validation: required fields must be present
    /// and non-empty.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.task_id.is_empty() {
            return Err(SchedulerError::Validation("task_id is empty".into()));
        }
        if self.project_id.is_empty() {
            return Err(SchedulerError::Validation("project_id is empty".into()));
        }
        if self.work_items.is_empty() {
            return Err(SchedulerError::Validation("work_items is empty".into()));
        }
        if self.target_categories.is_empty() {
            return Err(SchedulerError::Validation(
                "target_categories is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`TaskRequest`].
pub struct TaskRequestBuilder {
    task_id: Option<String>,
    project_id: String,
    work_items: Vec<WorkItem>,
    target_categories: Vec<String>,
    priority: TaskPriority,
    deadline: Option<DateTime<Utc>>,
    requirement: ResourceRequirement,
    callback: Option<CompletionCallback>,
}

impl TaskRequestBuilder {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            task_id: None,
            project_id: project_id.into(),
            work_items: Vec::new(),
            target_categories: Vec::new(),
            priority: TaskPriority::Normal,
            deadline: None,
            requirement: ResourceRequirement::default(),
            callback: None,
        }
    }

    /// Override the generated task id.
    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn work_item(mut self, item: WorkItem) -> Self {
        self.work_items.push(item);
        self
    }

    pub fn work_items(mut self, items: impl IntoIterator<Item = WorkItem>) -> Self {
        self.work_items.extend(items);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.target_categories.push(category.into());
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_categories
            .extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn requirement(mut self, requirement: ResourceRequirement) -> Self {
        self.requirement = requirement;
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TaskResult) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> TaskRequest {
        TaskRequest {
            task_id: self
                .task_id
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            project_id: self.project_id,
            work_items: self.work_items,
            target_categories: self.target_categories,
            priority: self.priority,
            deadline: self.deadline,
            requirement: self.requirement,
            callback: self.callback,
            created_at: Utc::now(),
        }
    }
}

// ── Task result ──────────────────────────────────────────────────────

/// Per-task outcome record, owned by the execution coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl TaskResult {
    /// Fresh record at submission time.
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            payload: None,
            error: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
        }
    }

    /// Wall-clock seconds between start and completion, when both are known.
    pub fn processing_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
