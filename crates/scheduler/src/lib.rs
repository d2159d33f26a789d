pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod resources;
pub mod scheduler;
pub mod strategy;
pub mod task;
pub mod traits;
pub mod worker;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use health::HealthMonitor;
pub use metrics::{SchedulerStatus, StatsSnapshot, WorkerStatusSnapshot};
pub use queue::{priority_score, QueuedTaskInfo, TaskQueue};
pub use resources::{ResourceKind, ResourceVector};
pub use scheduler::TaskScheduler;
pub use strategy::{
    FifoStrategy, LoadBalancedStrategy, PriorityStrategy, RoundRobinStrategy, SchedulingDecision,
    SchedulingStrategy, StrategyKind,
};
pub use task::{
    CompletionCallback, ResourceRequirement, TaskPriority, TaskRequest, TaskRequestBuilder,
    TaskResult, TaskStatus, WorkItem,
};
pub use traits::TaskExecutor;
pub use worker::{WorkerNode, WorkerRegistry};
