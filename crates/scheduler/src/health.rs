//! Worker liveness sweeping.
//!
//! Runs inside the scheduling loop: workers whose heartbeat has lapsed are
//! deactivated (excluded from `find_suitable` on the very next tick) and
//! their in-flight task ids are reported back so the coordinator can route
//! them through the normal failure path instead of orphaning them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::worker::WorkerRegistry;

pub struct HealthMonitor;

impl HealthMonitor {
    /// Deactivate every active worker whose last heartbeat is older than
    /// `timeout`, returning the task ids stranded on them.
    pub fn sweep(
        registry: &mut WorkerRegistry,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let lapse = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));

        let mut stranded = Vec::new();
        for node in registry.nodes_mut() {
            if node.active && now - node.last_heartbeat > lapse {
                node.active = false;
                warn!(
                    worker_id = %node.worker_id,
                    last_heartbeat = %node.last_heartbeat,
                    in_flight = node.assigned.len(),
                    "worker heartbeat lapsed, deactivating"
                );
                stranded.extend(node.assigned.iter().cloned());
            }
        }
        stranded
    }
}
