use std::time::Duration;

use async_trait::async_trait;

use vigil_core::Subject;

use crate::error::ExecutorError;
use crate::status::ExecutorStatus;
use crate::unit::ExecutionUnit;

/// Pluggable job-submission backend.
///
/// The scheduler is backend-agnostic: it only ever submits units, asks for a
/// drain at shutdown, and reads status snapshots. Implementations must keep
/// `submit` non-blocking (enqueue, never run inline) and `shutdown`
/// idempotent.
#[async_trait]
pub trait Executor<S: Subject>: Send + Sync {
    /// Enqueue a unit for asynchronous execution. Returns an error if the
    /// backend rejects it; the backend's own state stays consistent either
    /// way.
    async fn submit(&self, unit: ExecutionUnit<S>) -> Result<(), ExecutorError>;

    /// Stop accepting new work and wait for in-flight units to finish,
    /// up to `grace`. Returns whether termination was clean. Safe to call
    /// more than once; later calls return the first outcome.
    async fn shutdown(&self, grace: Duration) -> Result<bool, ExecutorError>;

    /// Point-in-time snapshot of job counters and capacity.
    fn status(&self) -> ExecutorStatus;
}
