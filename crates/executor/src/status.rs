//! Point-in-time executor status snapshot.
//!
//! The `executor.*` key names rendered by [`ExecutorStatus::to_map`] are a
//! stable contract for observability tooling; both backend variants report
//! the same keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const KEY_JOB_EXECUTED: &str = "executor.job.executed";
pub const KEY_JOB_RUNNING: &str = "executor.job.running";
pub const KEY_JOB_WAITING: &str = "executor.job.waiting";
pub const KEY_JOB_WAITTIME: &str = "executor.job.waittime";
pub const KEY_JOB_EXECUTETIME: &str = "executor.job.executetime";
pub const KEY_NODES: &str = "executor.nodes";
pub const KEY_CPUS: &str = "executor.cpus";
pub const KEY_PARALLELISM: &str = "executor.parallelism";

/// Snapshot of a backend's job counters and capacity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorStatus {
    /// Units finished since the backend started.
    pub jobs_executed: u64,
    /// Units currently executing.
    pub jobs_running: u64,
    /// Units accepted but not yet started.
    pub jobs_waiting: u64,
    /// Average queue time per unit, milliseconds.
    pub avg_wait_ms: f64,
    /// Average execution time per unit, milliseconds.
    pub avg_execute_ms: f64,
    /// Compute nodes participating in the backend.
    pub nodes: usize,
    /// Total CPUs across nodes.
    pub cpus: usize,
    /// Units the backend can run concurrently.
    pub parallelism: usize,
}

impl ExecutorStatus {
    /// Render the snapshot under the stable status keys.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert(KEY_JOB_EXECUTED.to_string(), json!(self.jobs_executed));
        map.insert(KEY_JOB_RUNNING.to_string(), json!(self.jobs_running));
        map.insert(KEY_JOB_WAITING.to_string(), json!(self.jobs_waiting));
        map.insert(KEY_JOB_WAITTIME.to_string(), json!(self.avg_wait_ms));
        map.insert(KEY_JOB_EXECUTETIME.to_string(), json!(self.avg_execute_ms));
        map.insert(KEY_NODES.to_string(), json!(self.nodes));
        map.insert(KEY_CPUS.to_string(), json!(self.cpus));
        map.insert(KEY_PARALLELISM.to_string(), json!(self.parallelism));
        map
    }
}
