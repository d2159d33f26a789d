use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SchedulerError;
use crate::task::TaskRequest;

/// Performs the actual work for a task: the external collaborator the
/// scheduler dispatches to.
///
/// Given a task's work items and target categories, an executor returns a
/// result payload or an error. It has no visibility into scheduling
/// internals and must tolerate being invoked concurrently for disjoint
/// tasks.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute one task to completion. Errors are captured per task by the
    /// coordinator and feed the retry/backoff path; they never crash the
    /// scheduling loop.
    async fn execute(&self, request: &TaskRequest) -> Result<serde_json::Value, SchedulerError>;
}

/// Blanket implementation so `Arc<dyn TaskExecutor>` can be used directly.
#[async_trait]
impl<T: TaskExecutor + ?Sized> TaskExecutor for Arc<T> {
    async fn execute(&self, request: &TaskRequest) -> Result<serde_json::Value, SchedulerError> {
        (**self).execute(request).await
    }
}
