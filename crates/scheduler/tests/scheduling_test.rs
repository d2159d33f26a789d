//! Integration tests for dispatch ordering, resource gating, worker
//! rotation, and the retry/backoff path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use fahrplan_scheduler::{
    ResourceRequirement, ResourceVector, SchedulerConfig, SchedulerError, StrategyKind,
    TaskExecutor, TaskPriority, TaskRequest, TaskResult, TaskScheduler, TaskStatus, WorkItem,
    WorkerNode,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(150);

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 10,
        retry_base_delay_secs: 0.1,
        shutdown_timeout_secs: 0.5,
        ..SchedulerConfig::default()
    }
}

fn worker(id: &str, slots: usize) -> WorkerNode {
    WorkerNode::new(id, "test", ResourceVector::new(4.0, 4096.0, 100.0, 20.0), slots)
}

fn request(id: &str, priority: TaskPriority) -> TaskRequest {
    TaskRequest::builder("project")
        .task_id(id)
        .work_item(WorkItem::new(1, "payload"))
        .category("en")
        .priority(priority)
        .requirement(ResourceRequirement {
            cpu_cores: 0.5,
            memory_mb: 128.0,
            network_mbps: 5.0,
            api_calls: 1.0,
            estimated_duration_secs: 1.0,
        })
        .build()
}

async fn wait_for_terminal(scheduler: &TaskScheduler, task_id: &str) -> TaskResult {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(result) = scheduler.get_task_status(task_id).await {
            if result.status.is_terminal() {
                return result;
            }
        }
        assert!(
            Instant::now() < deadline,
            "task {task_id} did not reach a terminal state in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Executors ────────────────────────────────────────────────────────

/// Records execution start order, then completes after a short delay.
struct RecordingExecutor {
    order: Mutex<Vec<String>>,
    delay: Duration,
}

impl RecordingExecutor {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            order: Mutex::new(Vec::new()),
            delay,
        })
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, request: &TaskRequest) -> Result<serde_json::Value, SchedulerError> {
        self.order.lock().await.push(request.task_id.clone());
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({ "task_id": request.task_id }))
    }
}

/// Records starts, then blocks until the gate opens.
struct GatedExecutor {
    started: Mutex<Vec<String>>,
    gate: watch::Receiver<bool>,
}

impl GatedExecutor {
    fn new() -> (Arc<Self>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Arc::new(Self {
                started: Mutex::new(Vec::new()),
                gate: rx,
            }),
            tx,
        )
    }
}

#[async_trait]
impl TaskExecutor for GatedExecutor {
    async fn execute(&self, request: &TaskRequest) -> Result<serde_json::Value, SchedulerError> {
        self.started.lock().await.push(request.task_id.clone());
        let mut gate = self.gate.clone();
        while !*gate.borrow_and_update() {
            if gate.changed().await.is_err() {
                break;
            }
        }
        Ok(serde_json::json!({ "ok": true }))
    }
}

/// Always fails, recording the start instant of every attempt.
struct FailingExecutor {
    attempts: Mutex<Vec<Instant>>,
}

impl FailingExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TaskExecutor for FailingExecutor {
    async fn execute(&self, _request: &TaskRequest) -> Result<serde_json::Value, SchedulerError> {
        self.attempts.lock().await.push(Instant::now());
        Err(SchedulerError::Execution("deliberate failure".into()))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_slot_worker_dispatches_in_priority_order() {
    let executor = RecordingExecutor::new(Duration::from_millis(20));
    let scheduler = TaskScheduler::new(test_config(), executor.clone()).unwrap();
    scheduler.register_worker(worker("w1", 1)).await;

    // Submitted LOW, HIGH, NORMAL — dispatch must follow descending priority.
    scheduler
        .submit(request("low", TaskPriority::Low))
        .await
        .unwrap();
    scheduler
        .submit(request("high", TaskPriority::High))
        .await
        .unwrap();
    scheduler
        .submit(request("normal", TaskPriority::Normal))
        .await
        .unwrap();

    scheduler.start().await;
    for id in ["low", "high", "normal"] {
        let result = wait_for_terminal(&scheduler, id).await;
        assert_eq!(result.status, TaskStatus::Completed, "task {id}");
    }
    scheduler.shutdown().await;

    let order = executor.order.lock().await.clone();
    assert_eq!(order, vec!["high", "normal", "low"]);
}

#[tokio::test]
async fn equal_priority_resolves_fifo() {
    let executor = RecordingExecutor::new(Duration::from_millis(10));
    let scheduler = TaskScheduler::new(test_config(), executor.clone()).unwrap();
    scheduler.register_worker(worker("w1", 1)).await;

    for id in ["a", "b", "c"] {
        scheduler
            .submit(request(id, TaskPriority::Normal))
            .await
            .unwrap();
    }

    scheduler.start().await;
    for id in ["a", "b", "c"] {
        wait_for_terminal(&scheduler, id).await;
    }
    scheduler.shutdown().await;

    let order = executor.order.lock().await.clone();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn task_waits_until_resources_release() {
    let (executor, gate) = GatedExecutor::new();
    let scheduler = TaskScheduler::new(test_config(), executor.clone()).unwrap();

    // CPU capacity 2.0: A (1.5) and B (1.0) cannot run together.
    let node = WorkerNode::new("w1", "test", ResourceVector::new(2.0, 4096.0, 100.0, 20.0), 4);
    scheduler.register_worker(node).await;
    scheduler.start().await;

    let mut big = request("big", TaskPriority::High);
    big.requirement.cpu_cores = 1.5;
    let mut small = request("small", TaskPriority::Normal);
    small.requirement.cpu_cores = 1.0;

    scheduler.submit(big).await.unwrap();
    scheduler.submit(small).await.unwrap();

    tokio::time::sleep(SETTLE).await;

    // A runs; B has to wait for the CPU to come back.
    assert_eq!(executor.started.lock().await.clone(), vec!["big"]);
    let small_status = scheduler.get_task_status("small").await.unwrap();
    assert_eq!(small_status.status, TaskStatus::Queued);
    assert_eq!(scheduler.status().await.queue_depth, 1);

    gate.send(true).unwrap();

    assert_eq!(
        wait_for_terminal(&scheduler, "big").await.status,
        TaskStatus::Completed
    );
    assert_eq!(
        wait_for_terminal(&scheduler, "small").await.status,
        TaskStatus::Completed
    );
    scheduler.shutdown().await;
}

#[tokio::test]
async fn round_robin_spreads_tasks_across_workers() {
    let (executor, gate) = GatedExecutor::new();
    let mut config = test_config();
    config.strategy = StrategyKind::RoundRobin;
    let scheduler = TaskScheduler::new(config, executor.clone()).unwrap();

    for id in ["w0", "w1", "w2"] {
        scheduler.register_worker(worker(id, 2)).await;
    }
    scheduler.start().await;

    for i in 0..6 {
        scheduler
            .submit(request(&format!("task-{i}"), TaskPriority::Normal))
            .await
            .unwrap();
    }

    // All six block in the executor, pinned to their assigned workers.
    let deadline = Instant::now() + TIMEOUT;
    while executor.started.lock().await.len() < 6 {
        assert!(Instant::now() < deadline, "not all tasks started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = scheduler.status().await;
    for snapshot in &status.workers {
        assert_eq!(
            snapshot.assigned, 2,
            "worker {} should hold exactly 2 tasks",
            snapshot.worker_id
        );
    }

    gate.send(true).unwrap();
    for i in 0..6 {
        wait_for_terminal(&scheduler, &format!("task-{i}")).await;
    }
    scheduler.shutdown().await;
}

#[tokio::test]
async fn failing_task_retries_with_exponential_backoff() {
    let executor = FailingExecutor::new();
    let mut config = test_config();
    config.max_retries = 3;
    config.retry_base_delay_secs = 0.1;
    let scheduler = TaskScheduler::new(config, executor.clone()).unwrap();

    scheduler.register_worker(worker("w1", 2)).await;
    scheduler.start().await;
    scheduler
        .submit(request("doomed", TaskPriority::Normal))
        .await
        .unwrap();

    let result = wait_for_terminal(&scheduler, "doomed").await;
    scheduler.shutdown().await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.retry_count, 3);
    assert!(result.error.unwrap().contains("deliberate failure"));

    // Initial attempt plus three retries.
    let attempts = executor.attempts.lock().await.clone();
    assert_eq!(attempts.len(), 4);

    // Backoff lower bounds: base * 2^0, 2^1, 2^2 between consecutive
    // attempts (small tolerance for timer coarseness; no upper bound to
    // keep the test robust under load).
    for (i, expected) in [0.1, 0.2, 0.4].iter().enumerate() {
        let gap = attempts[i + 1] - attempts[i];
        assert!(
            gap.as_secs_f64() >= expected * 0.8,
            "gap {i} too short: {:?} (expected ≥ {expected}s)",
            gap
        );
    }

    let counters = scheduler.status().await.counters;
    assert_eq!(counters.retries, 3);
    assert_eq!(counters.failed, 1);
}

#[tokio::test]
async fn retry_disabled_fails_on_first_error() {
    let executor = FailingExecutor::new();
    let mut config = test_config();
    config.auto_retry = false;
    let scheduler = TaskScheduler::new(config, executor.clone()).unwrap();

    scheduler.register_worker(worker("w1", 2)).await;
    scheduler.start().await;
    scheduler
        .submit(request("doomed", TaskPriority::Normal))
        .await
        .unwrap();

    let result = wait_for_terminal(&scheduler, "doomed").await;
    scheduler.shutdown().await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.retry_count, 0);
    assert_eq!(executor.attempts.lock().await.len(), 1);
}

#[tokio::test]
async fn completion_callback_receives_final_result() {
    let executor = RecordingExecutor::new(Duration::from_millis(10));
    let scheduler = TaskScheduler::new(test_config(), executor).unwrap();
    scheduler.register_worker(worker("w1", 2)).await;
    scheduler.start().await;

    let seen: Arc<std::sync::Mutex<Option<TaskResult>>> =
        Arc::new(std::sync::Mutex::new(None));
    let seen_by_callback = Arc::clone(&seen);

    let request = TaskRequest::builder("project")
        .task_id("with-callback")
        .work_item(WorkItem::new(1, "payload"))
        .category("en")
        .on_complete(move |result| {
            *seen_by_callback.lock().unwrap() = Some(result.clone());
        })
        .build();

    scheduler.submit(request).await.unwrap();
    let result = wait_for_terminal(&scheduler, "with-callback").await;
    scheduler.shutdown().await;

    assert_eq!(result.status, TaskStatus::Completed);
    assert!(result.payload.is_some());

    let callback_result = seen.lock().unwrap().clone().expect("callback should fire");
    assert_eq!(callback_result.status, TaskStatus::Completed);
    assert_eq!(callback_result.task_id, "with-callback");
}

#[tokio::test]
async fn panicking_callback_does_not_poison_the_coordinator() {
    let executor = RecordingExecutor::new(Duration::from_millis(10));
    let scheduler = TaskScheduler::new(test_config(), executor).unwrap();
    scheduler.register_worker(worker("w1", 2)).await;
    scheduler.start().await;

    let request = TaskRequest::builder("project")
        .task_id("explosive")
        .work_item(WorkItem::new(1, "payload"))
        .category("en")
        .on_complete(|_| panic!("callback goes boom"))
        .build();
    scheduler.submit(request).await.unwrap();

    let result = wait_for_terminal(&scheduler, "explosive").await;
    assert_eq!(result.status, TaskStatus::Completed);

    // The scheduler still dispatches after the panic.
    scheduler
        .submit(TaskRequest::builder("project")
            .task_id("after")
            .work_item(WorkItem::new(1, "payload"))
            .category("en")
            .build())
        .await
        .unwrap();
    let result = wait_for_terminal(&scheduler, "after").await;
    assert_eq!(result.status, TaskStatus::Completed);

    scheduler.shutdown().await;
}
