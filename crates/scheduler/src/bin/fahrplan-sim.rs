//! fahrplan-sim — drives the scheduler against a simulated executor.
//!
//! Registers a small worker fleet, submits a mixed-priority batch of tasks,
//! keeps worker heartbeats fresh, waits for every task to reach a terminal
//! state, and prints the final status snapshot as JSON.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use tracing::info;

use fahrplan_scheduler::{
    ResourceRequirement, ResourceVector, SchedulerConfig, SchedulerError, StrategyKind,
    TaskExecutor, TaskPriority, TaskRequest, TaskScheduler, TaskStatus, WorkItem, WorkerNode,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Fahrplan scheduler simulation driver.
#[derive(Parser, Debug)]
#[command(name = "fahrplan-sim", version, about)]
struct Cli {
    /// Path to a fahrplan.toml config file (defaults apply when omitted).
    #[arg(long, env = "FAHRPLAN_CONFIG")]
    config: Option<String>,

    /// Number of workers to register.
    #[arg(long, env = "FAHRPLAN_SIM_WORKERS", default_value_t = 3)]
    workers: usize,

    /// Number of tasks to submit.
    #[arg(long, env = "FAHRPLAN_SIM_TASKS", default_value_t = 12)]
    tasks: usize,

    /// Scheduling strategy: fifo, priority, round_robin, load_balanced.
    #[arg(long, env = "FAHRPLAN_SIM_STRATEGY")]
    strategy: Option<StrategyKind>,

    /// Simulated per-task execution time in milliseconds.
    #[arg(long, env = "FAHRPLAN_SIM_TASK_DELAY_MS", default_value_t = 50)]
    task_delay_ms: u64,

    /// Fail every Nth task on its first attempt (0 disables failures).
    #[arg(long, env = "FAHRPLAN_SIM_FAIL_EVERY", default_value_t = 0)]
    fail_every: usize,
}

// ── Simulated executor ──────────────────────────────────────────────

/// Pretend work performer: sleeps for the configured delay and echoes each
/// work item per target category. Failure injection counts execution
/// attempts, so a failed task's retry usually lands on a passing slot and
/// the retry path shows up in the final counters.
struct SimulatedExecutor {
    delay: Duration,
    fail_every: usize,
    attempts: AtomicUsize,
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, request: &TaskRequest) -> Result<serde_json::Value, SchedulerError> {
        tokio::time::sleep(self.delay).await;

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_every > 0 && attempt % self.fail_every == self.fail_every - 1 {
            return Err(SchedulerError::Execution(format!(
                "simulated failure on task '{}'",
                request.task_id
            )));
        }

        let mut per_category = serde_json::Map::new();
        for category in &request.target_categories {
            let items: Vec<serde_json::Value> = request
                .work_items
                .iter()
                .map(|item| {
                    serde_json::json!({
                        "index": item.index,
                        "content": format!("[{category}] {}", item.content),
                    })
                })
                .collect();
            per_category.insert(category.clone(), serde_json::Value::Array(items));
        }

        Ok(serde_json::json!({
            "task_id": request.task_id,
            "results": per_category,
            "item_count": request.work_items.len(),
        }))
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::from_path(path)?,
        None => SchedulerConfig::default(),
    };
    // Tight loop timing so short simulations finish promptly.
    config.tick_interval_ms = 50;
    config.retry_base_delay_secs = 0.2;
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }

    let executor = Arc::new(SimulatedExecutor {
        delay: Duration::from_millis(cli.task_delay_ms),
        fail_every: cli.fail_every,
        attempts: AtomicUsize::new(0),
    });

    let scheduler = Arc::new(TaskScheduler::new(config, executor)?);

    // Worker fleet: identical declared capacity, a few slots each.
    for i in 0..cli.workers {
        let node = WorkerNode::new(
            format!("worker-{i}"),
            "simulated",
            ResourceVector::new(2.0, 1024.0, 100.0, 10.0),
            3,
        );
        scheduler.register_worker(node).await;
    }

    // Keep heartbeats fresh for the duration of the run.
    let heartbeat_scheduler = Arc::clone(&scheduler);
    let worker_count = cli.workers;
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        loop {
            ticker.tick().await;
            for i in 0..worker_count {
                heartbeat_scheduler
                    .update_worker_heartbeat(&format!("worker-{i}"), None)
                    .await;
            }
        }
    });

    scheduler.start().await;

    // Mixed batch: priorities cycle, every fourth task gets a deadline.
    const PRIORITIES: [TaskPriority; 5] = [
        TaskPriority::Low,
        TaskPriority::Normal,
        TaskPriority::High,
        TaskPriority::Urgent,
        TaskPriority::Critical,
    ];

    let mut task_ids = Vec::with_capacity(cli.tasks);
    for i in 0..cli.tasks {
        let mut builder = TaskRequest::builder("sim-project")
            .task_id(format!("task-{i:03}"))
            .work_items((0..3).map(|j| WorkItem::new(j, format!("item {j} of task {i}"))))
            .categories(["en", "de"])
            .priority(PRIORITIES[i % PRIORITIES.len()])
            .requirement(ResourceRequirement {
                cpu_cores: 0.5,
                memory_mb: 128.0,
                network_mbps: 5.0,
                api_calls: 1.0,
                estimated_duration_secs: cli.task_delay_ms as f64 / 1000.0,
            });
        if i % 4 == 0 {
            builder = builder.deadline(Utc::now() + chrono::Duration::minutes(5));
        }
        let task_id = scheduler.submit(builder.build()).await?;
        task_ids.push(task_id);
    }
    info!(submitted = task_ids.len(), "batch submitted");

    // Wait until every task reaches a terminal state.
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut done = 0;
        for task_id in &task_ids {
            if let Some(result) = scheduler.get_task_status(task_id).await {
                if result.status.is_terminal() {
                    done += 1;
                }
            }
        }
        if done == task_ids.len() {
            break;
        }
    }

    let status = scheduler.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    heartbeat.abort();
    scheduler.shutdown().await;

    for task_id in &task_ids {
        if let Some(result) = scheduler.get_task_status(task_id).await {
            if result.status == TaskStatus::Failed {
                info!(task_id = %task_id, error = ?result.error, "task ended failed");
            }
        }
    }

    Ok(())
}
