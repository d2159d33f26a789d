//! The task scheduler: submission surface, dispatch, retry with backoff,
//! and the periodic scheduling loop.
//!
//! All mutable state lives behind a single coarse-grained lock held for the
//! duration of each loop iteration and each dispatch/completion transition.
//! Task execution itself runs off the lock on a bounded pool; completion is
//! observed through the spawned future, not polled.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::health::HealthMonitor;
use crate::metrics::{SchedulerStatus, StatsCollector, WorkerStatusSnapshot};
use crate::queue::{priority_score, QueuedTaskInfo, TaskQueue};
use crate::resources::ResourceVector;
use crate::strategy::{make_decision, SchedulingStrategy, StrategyKind};
use crate::task::{TaskRequest, TaskResult, TaskStatus};
use crate::traits::TaskExecutor;
use crate::worker::{WorkerNode, WorkerRegistry};

// ── Shared state ─────────────────────────────────────────────────────

/// A dispatched task: the request, where it runs, and which attempt this
/// is. The attempt number fences stale completions after a fail-over.
struct RunningTask {
    request: TaskRequest,
    worker_id: String,
    attempt: u32,
}

/// Everything behind the scheduler's lock.
struct SchedulerState {
    queue: TaskQueue,
    registry: WorkerRegistry,
    results: std::collections::HashMap<String, TaskResult>,
    running: std::collections::HashMap<String, RunningTask>,
    stats: StatsCollector,
    strategy: Box<dyn SchedulingStrategy + Send>,
}

// ── Scheduler ────────────────────────────────────────────────────────

/// Priority-based task scheduler with resource-aware worker assignment.
///
/// Create with [`TaskScheduler::new`], register workers, call
/// [`TaskScheduler::start`], and submit tasks. The caller's executor is
/// invoked concurrently for disjoint tasks on a pool bounded by
/// `config.max_workers`.
pub struct TaskScheduler {
    scheduler_id: String,
    config: SchedulerConfig,
    executor: Arc<dyn TaskExecutor>,
    state: Arc<Mutex<SchedulerState>>,
    permits: Arc<Semaphore>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let uuid = Uuid::new_v4().simple().to_string();
        let scheduler_id = format!("scheduler-{}", &uuid[..8]);
        let (shutdown_tx, _) = watch::channel(false);

        let state = SchedulerState {
            queue: TaskQueue::new(),
            registry: WorkerRegistry::new(),
            results: std::collections::HashMap::new(),
            running: std::collections::HashMap::new(),
            stats: StatsCollector::new(),
            strategy: config.strategy.build(),
        };

        info!(
            scheduler_id = %scheduler_id,
            max_workers = config.max_workers,
            strategy = %config.strategy,
            "scheduler created"
        );

        Ok(Self {
            scheduler_id,
            permits: Arc::new(Semaphore::new(config.max_workers)),
            config,
            executor,
            state: Arc::new(Mutex::new(state)),
            running: AtomicBool::new(false),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        })
    }

    pub fn scheduler_id(&self) -> &str {
        &self.scheduler_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the scheduling loop: health sweep → queue-wait expiry → drain
    /// ready tasks → dispatch, once per tick.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(scheduler_id = %self.scheduler_id, "scheduler already running");
            return;
        }
        self.shutdown_tx.send_replace(false);

        let state = Arc::clone(&self.state);
        let permits = Arc::clone(&self.permits);
        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.tick_interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run_cycle(&state, &permits, &executor, &config).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("scheduling loop stopped");
        });

        *self.loop_handle.lock().await = Some(handle);
        info!(scheduler_id = %self.scheduler_id, "scheduler started");
    }

    /// Stop the scheduling loop and wait up to the configured shutdown
    /// timeout for in-flight tasks to drain. Queued tasks stay queued.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduling loop join failed");
            }
        }

        // All permits back means no task is in flight.
        let drain = self.permits.acquire_many(self.config.max_workers as u32);
        match tokio::time::timeout(self.config.shutdown_timeout(), drain).await {
            Ok(Ok(permit)) => drop(permit),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(
                    scheduler_id = %self.scheduler_id,
                    "shutdown timed out waiting for in-flight tasks"
                );
            }
        }

        info!(scheduler_id = %self.scheduler_id, "scheduler stopped");
    }

    // ── Submission surface ───────────────────────────────────────────

    /// Submit a task. Validation failures surface synchronously; on success
    /// the task is scored and queued, and its id is returned.
    pub async fn submit(&self, request: TaskRequest) -> Result<String, SchedulerError> {
        request.validate()?;

        let mut guard = self.state.lock().await;
        let st = &mut *guard;

        if st.results.contains_key(&request.task_id) {
            return Err(SchedulerError::DuplicateTask(request.task_id.clone()));
        }

        let task_id = request.task_id.clone();
        let mut result = TaskResult::pending(&task_id);
        result.status = TaskStatus::Queued;
        st.results.insert(task_id.clone(), result);
        st.stats.record_submitted(&request);

        let score = priority_score(&request, Utc::now());
        info!(
            task_id = %task_id,
            project_id = %request.project_id,
            priority = %request.priority.as_str(),
            score,
            queue_depth = st.queue.len() + 1,
            "task submitted"
        );
        st.queue.push(request, score);

        Ok(task_id)
    }

    /// Current result record for a task, if it was ever submitted.
    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskResult> {
        self.state.lock().await.results.get(task_id).cloned()
    }

    /// Cancel a task. Queued tasks are removed outright; running (or
    /// backoff-waiting) tasks are marked cancelled cooperatively — the
    /// in-flight work runs to completion and its result is discarded.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;

        if st.queue.cancel(task_id) {
            if let Some(result) = st.results.get_mut(task_id) {
                result.status = TaskStatus::Cancelled;
                result.completed_at = Some(Utc::now());
            }
            st.stats.record_cancelled();
            info!(task_id, "queued task cancelled");
            return true;
        }

        match st.results.get_mut(task_id) {
            Some(result)
                if matches!(result.status, TaskStatus::Running | TaskStatus::Retrying) =>
            {
                result.status = TaskStatus::Cancelled;
                st.stats.record_cancelled();
                info!(task_id, "in-flight task marked cancelled, result will be discarded");
                true
            }
            Some(_) => false,
            None => {
                warn!(task_id, "cancel requested for unknown task");
                false
            }
        }
    }

    // ── Worker surface ───────────────────────────────────────────────

    pub async fn register_worker(&self, node: WorkerNode) -> bool {
        self.state.lock().await.registry.register(node)
    }

    /// Fails while the worker still has assigned tasks.
    pub async fn unregister_worker(&self, worker_id: &str) -> bool {
        self.state.lock().await.registry.unregister(worker_id)
    }

    pub async fn update_worker_heartbeat(
        &self,
        worker_id: &str,
        usage: Option<ResourceVector>,
    ) -> bool {
        self.state
            .lock()
            .await
            .registry
            .update_heartbeat(worker_id, usage.as_ref(), Utc::now())
    }

    // ── Status / strategy ────────────────────────────────────────────

    pub async fn set_strategy(&self, kind: StrategyKind) {
        let mut guard = self.state.lock().await;
        guard.strategy = kind.build();
        info!(strategy = %kind, "scheduling strategy updated");
    }

    pub async fn status(&self) -> SchedulerStatus {
        let guard = self.state.lock().await;
        let workers = guard
            .registry
            .nodes()
            .map(|node| WorkerStatusSnapshot {
                worker_id: node.worker_id.clone(),
                node_type: node.node_type.clone(),
                active: node.active,
                assigned: node.assigned.len(),
                max_concurrent: node.max_concurrent,
                load_pct: node.load_score() * 100.0,
            })
            .collect();

        SchedulerStatus {
            scheduler_id: self.scheduler_id.clone(),
            running: self.is_running(),
            strategy: guard.strategy.name().to_string(),
            queue_depth: guard.queue.len(),
            running_count: guard.running.len(),
            active_workers: guard.registry.active_count(),
            workers,
            utilization: guard.registry.utilization(),
            counters: guard.stats.snapshot(),
        }
    }

    /// Live queue contents, highest priority first.
    pub async fn queue_info(&self) -> Vec<QueuedTaskInfo> {
        self.state.lock().await.queue.pending()
    }

    /// Zero the performance counters. Queue, workers, and task records are
    /// untouched.
    pub async fn reset_stats(&self) {
        self.state.lock().await.stats.reset();
        info!(scheduler_id = %self.scheduler_id, "statistics reset");
    }

    // ── Scheduling loop ──────────────────────────────────────────────

    /// One loop iteration, entirely under the state lock. Execution futures
    /// spawned here only touch state once the lock is released.
    async fn run_cycle(
        state: &Arc<Mutex<SchedulerState>>,
        permits: &Arc<Semaphore>,
        executor: &Arc<dyn TaskExecutor>,
        config: &SchedulerConfig,
    ) {
        let now = Utc::now();
        let mut guard = state.lock().await;
        let st = &mut *guard;

        // Health sweep: deactivate lapsed workers and fail their in-flight
        // tasks over to the retry path.
        let stranded = HealthMonitor::sweep(&mut st.registry, config.heartbeat_timeout(), now);
        for task_id in stranded {
            if let Some(entry) = st.running.remove(&task_id) {
                if let Some(worker) = st.registry.get_mut(&entry.worker_id) {
                    worker.release(&entry.request.requirement);
                    worker.assigned.remove(&task_id);
                }
                let error = format!("worker '{}' heartbeat lost", entry.worker_id);
                Self::fail_attempt_locked(st, state, config, entry.request, error);
            }
        }

        // Queue-wait bound: fail tasks that out-waited the configured limit.
        if let Some(bound) = config.max_queue_wait() {
            let cutoff = now
                - chrono::Duration::from_std(bound).unwrap_or_else(|_| chrono::Duration::zero());
            for request in st.queue.drain_expired(cutoff) {
                if let Some(result) = st.results.get_mut(&request.task_id) {
                    result.status = TaskStatus::Failed;
                    result.error = Some(format!(
                        "no worker satisfied the resource requirement within {:.1}s",
                        bound.as_secs_f64()
                    ));
                    result.completed_at = Some(now);
                }
                st.stats.record_expired();
                warn!(task_id = %request.task_id, "task failed by queue-wait bound");
            }
        }

        // Drain ready tasks into dispatch, bounded by available permits.
        loop {
            let permit = match Arc::clone(permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break, // pool exhausted
            };

            let registry = &st.registry;
            let Some(task) = st
                .queue
                .pop_ready(|req| !registry.find_suitable(&req.requirement).is_empty())
            else {
                break;
            };

            let now = Utc::now();
            let decision = make_decision(st.strategy.as_mut(), &st.registry, &task, now);
            let Some(worker_id) = decision.worker_id.clone() else {
                // Suitability changed between pop and decision; requeue.
                let score = priority_score(&task, now);
                st.queue.push(task, score);
                break;
            };
            debug!(
                task_id = %decision.task_id,
                worker_id = %worker_id,
                confidence = decision.confidence,
                reason = %decision.reason,
                "scheduling decision"
            );

            let Some(worker) = st.registry.get_mut(&worker_id) else {
                let score = priority_score(&task, now);
                st.queue.push(task, score);
                break;
            };
            worker.allocate(&task.requirement);
            worker.assigned.insert(task.task_id.clone());

            let attempt = st
                .results
                .get(&task.task_id)
                .map(|r| r.retry_count)
                .unwrap_or(0);
            if let Some(result) = st.results.get_mut(&task.task_id) {
                result.status = TaskStatus::Running;
                result.started_at = Some(now);
            }

            let queue_wait = (now - task.created_at).num_milliseconds() as f64 / 1000.0;
            st.stats.record_dispatched(queue_wait);
            st.running.insert(
                task.task_id.clone(),
                RunningTask {
                    request: task.clone(),
                    worker_id: worker_id.clone(),
                    attempt,
                },
            );

            info!(
                task_id = %task.task_id,
                worker_id = %worker_id,
                attempt,
                "task dispatched"
            );

            let state = Arc::clone(state);
            let executor = Arc::clone(executor);
            let config = config.clone();
            tokio::spawn(async move {
                let outcome = executor.execute(&task).await;
                Self::finish_attempt(&state, &config, &task.task_id, attempt, outcome).await;
                drop(permit);
            });
        }
    }

    // ── Completion / failure ─────────────────────────────────────────

    /// Observe the end of one execution attempt: release resources, then
    /// complete, discard (if cancelled), or fail with retry.
    async fn finish_attempt(
        state: &Arc<Mutex<SchedulerState>>,
        config: &SchedulerConfig,
        task_id: &str,
        attempt: u32,
        outcome: Result<serde_json::Value, SchedulerError>,
    ) {
        let mut guard = state.lock().await;
        let st = &mut *guard;

        // A fail-over or cleanup may already have retired this attempt.
        let current = st.running.get(task_id).is_some_and(|e| e.attempt == attempt);
        if !current {
            debug!(task_id, attempt, "stale completion ignored");
            return;
        }
        let Some(entry) = st.running.remove(task_id) else {
            return;
        };

        if let Some(worker) = st.registry.get_mut(&entry.worker_id) {
            worker.release(&entry.request.requirement);
            worker.assigned.remove(task_id);
        }

        let cancelled = st
            .results
            .get(task_id)
            .is_some_and(|r| r.status == TaskStatus::Cancelled);
        if cancelled {
            if let Some(result) = st.results.get_mut(task_id) {
                result.completed_at = Some(Utc::now());
            }
            debug!(task_id, "discarding result of cancelled task");
            return;
        }

        match outcome {
            Ok(payload) => {
                let snapshot = {
                    let Some(result) = st.results.get_mut(task_id) else {
                        return;
                    };
                    result.status = TaskStatus::Completed;
                    result.completed_at = Some(Utc::now());
                    result.payload = Some(payload);
                    result.clone()
                };
                st.stats
                    .record_completed(snapshot.processing_seconds().unwrap_or(0.0));
                info!(
                    task_id,
                    processing_secs = snapshot.processing_seconds().unwrap_or(0.0),
                    "task completed"
                );
                drop(guard);
                Self::invoke_callback(&entry.request, &snapshot);
            }
            Err(e) => {
                Self::fail_attempt_locked(st, state, config, entry.request, e.to_string());
            }
        }
    }

    /// Handle a failed attempt for a task that has already been detached
    /// from its worker: retry with exponential backoff, or fail terminally.
    fn fail_attempt_locked(
        st: &mut SchedulerState,
        state: &Arc<Mutex<SchedulerState>>,
        config: &SchedulerConfig,
        request: TaskRequest,
        error_message: String,
    ) {
        let task_id = request.task_id.clone();

        let retry_count = match st.results.get_mut(&task_id) {
            Some(result) if config.auto_retry && result.retry_count < config.max_retries => {
                result.status = TaskStatus::Retrying;
                result.error = Some(error_message.clone());
                let current = result.retry_count;
                result.retry_count += 1;
                Some(current)
            }
            Some(result) => {
                result.status = TaskStatus::Failed;
                result.error = Some(error_message.clone());
                result.completed_at = Some(Utc::now());
                None
            }
            None => return,
        };

        match retry_count {
            Some(count) => {
                st.stats.record_retry();
                let delay = config.retry_base_delay().mul_f64(f64::powi(2.0, count as i32));
                warn!(
                    task_id = %task_id,
                    attempt = count + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error_message,
                    "task attempt failed, retrying after backoff"
                );

                let state = Arc::clone(state);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let mut guard = state.lock().await;
                    let st = &mut *guard;
                    // Cancelled during backoff: stay cancelled, do not requeue.
                    let still_retrying = st
                        .results
                        .get(&request.task_id)
                        .is_some_and(|r| r.status == TaskStatus::Retrying);
                    if !still_retrying {
                        return;
                    }
                    if let Some(result) = st.results.get_mut(&request.task_id) {
                        result.status = TaskStatus::Queued;
                    }
                    let score = priority_score(&request, Utc::now());
                    st.queue.push(request, score);
                });
            }
            None => {
                st.stats.record_failed();
                error!(task_id = %task_id, error = %error_message, "task failed permanently");
            }
        }
    }

    /// Invoke the caller's completion callback. Panics are logged, never
    /// propagated into the coordinator.
    fn invoke_callback(request: &TaskRequest, result: &TaskResult) {
        if let Some(callback) = &request.callback {
            let callback = Arc::clone(callback);
            if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                warn!(task_id = %result.task_id, "completion callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::WorkItem;
    use async_trait::async_trait;

    struct NoopExecutor;

    #[async_trait]
    impl TaskExecutor for NoopExecutor {
        async fn execute(&self, _request: &TaskRequest) -> Result<serde_json::Value, SchedulerError> {
            Ok(serde_json::json!({}))
        }
    }

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(SchedulerConfig::default(), Arc::new(NoopExecutor)).unwrap()
    }

    fn request(id: &str) -> TaskRequest {
        TaskRequest::builder("project")
            .task_id(id)
            .work_item(WorkItem::new(1, "x"))
            .category("en")
            .build()
    }

    #[tokio::test]
    async fn submit_validates_and_queues() {
        let scheduler = scheduler();
        let task_id = scheduler.submit(request("t1")).await.unwrap();
        assert_eq!(task_id, "t1");

        let result = scheduler.get_task_status("t1").await.unwrap();
        assert_eq!(result.status, TaskStatus::Queued);
        assert_eq!(result.retry_count, 0);

        let status = scheduler.status().await;
        assert_eq!(status.queue_depth, 1);
        assert_eq!(status.counters.submitted, 1);
    }

    #[tokio::test]
    async fn submit_rejects_invalid_and_duplicate() {
        let scheduler = scheduler();

        let invalid = TaskRequest::builder("project").task_id("bad").build();
        assert!(matches!(
            scheduler.submit(invalid).await,
            Err(SchedulerError::Validation(_))
        ));

        scheduler.submit(request("t1")).await.unwrap();
        assert!(matches!(
            scheduler.submit(request("t1")).await,
            Err(SchedulerError::DuplicateTask(_))
        ));
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_false() {
        let scheduler = scheduler();
        assert!(!scheduler.cancel("ghost").await);
    }

    #[tokio::test]
    async fn cancel_queued_task_is_permanent() {
        let scheduler = scheduler();
        scheduler.submit(request("t1")).await.unwrap();

        assert!(scheduler.cancel("t1").await);
        assert!(!scheduler.cancel("t1").await);

        let result = scheduler.get_task_status("t1").await.unwrap();
        assert_eq!(result.status, TaskStatus::Cancelled);

        let status = scheduler.status().await;
        assert_eq!(status.queue_depth, 0);
        assert_eq!(status.counters.cancelled, 1);
    }

    #[tokio::test]
    async fn status_reflects_workers() {
        let scheduler = scheduler();
        scheduler
            .register_worker(WorkerNode::new(
                "w1",
                "general",
                ResourceVector::new(2.0, 1024.0, 100.0, 10.0),
                3,
            ))
            .await;

        let status = scheduler.status().await;
        assert_eq!(status.active_workers, 1);
        assert_eq!(status.workers.len(), 1);
        assert_eq!(status.workers[0].worker_id, "w1");
        assert!(!status.running);
    }

    #[tokio::test]
    async fn queue_info_lists_pending_tasks() {
        let scheduler = scheduler();
        scheduler.submit(request("t1")).await.unwrap();
        scheduler.submit(request("t2")).await.unwrap();
        scheduler.cancel("t1").await;

        let info = scheduler.queue_info().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].task_id, "t2");
        assert_eq!(info[0].project_id, "project");
    }

    #[tokio::test]
    async fn reset_stats_clears_counters() {
        let scheduler = scheduler();
        scheduler.submit(request("t1")).await.unwrap();
        assert_eq!(scheduler.status().await.counters.submitted, 1);

        scheduler.reset_stats().await;
        assert_eq!(scheduler.status().await.counters.submitted, 0);
    }

    #[tokio::test]
    async fn set_strategy_swaps_policy() {
        let scheduler = scheduler();
        assert_eq!(scheduler.status().await.strategy, "priority");

        scheduler.set_strategy(StrategyKind::RoundRobin).await;
        assert_eq!(scheduler.status().await.strategy, "round_robin");
    }
}
