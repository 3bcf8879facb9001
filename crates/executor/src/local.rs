//! In-process worker pool backend.
//!
//! Units are fed through an unbounded queue to a fixed number of worker
//! tasks, so `submit` never blocks the scheduler. Single-node deployments
//! and tests use this backend; the cluster backend satisfies the same
//! contract for horizontal scale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use vigil_core::{Datastore, DetectorRegistry, Subject};

use crate::error::ExecutorError;
use crate::status::ExecutorStatus;
use crate::traits::Executor;
use crate::unit::ExecutionUnit;

struct Envelope<S: Subject> {
    unit: ExecutionUnit<S>,
    enqueued: Instant,
}

#[derive(Default)]
struct PoolCounters {
    executed: AtomicU64,
    running: AtomicU64,
    waiting: AtomicU64,
    wait_micros: AtomicU64,
    execute_micros: AtomicU64,
}

/// Fixed-size tokio worker pool running units in-process.
pub struct LocalExecutor<S: Subject> {
    tx: StdMutex<Option<mpsc::UnboundedSender<Envelope<S>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
    /// First shutdown outcome, kept for idempotence.
    shutdown_outcome: Mutex<Option<bool>>,
    parallelism: usize,
}

impl<S: Subject> LocalExecutor<S> {
    /// Spawn `parallelism` worker tasks (at least one). Must be called from
    /// within a tokio runtime.
    pub fn new(
        parallelism: usize,
        registry: Arc<DetectorRegistry<S>>,
        datastore: Arc<dyn Datastore<S>>,
    ) -> Self {
        let parallelism = parallelism.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Envelope<S>>();
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(parallelism);
        for worker in 0..parallelism {
            let rx = Arc::clone(&rx);
            let counters = Arc::clone(&counters);
            let registry = Arc::clone(&registry);
            let datastore = Arc::clone(&datastore);

            workers.push(tokio::spawn(async move {
                loop {
                    // Lock only for the dequeue; the unit runs outside it so
                    // the pool actually executes in parallel.
                    let envelope = { rx.lock().await.recv().await };
                    let Some(envelope) = envelope else {
                        debug!(worker, "worker pool queue closed, exiting");
                        break;
                    };

                    counters.waiting.fetch_sub(1, Ordering::SeqCst);
                    counters.wait_micros.fetch_add(
                        envelope.enqueued.elapsed().as_micros() as u64,
                        Ordering::SeqCst,
                    );
                    counters.running.fetch_add(1, Ordering::SeqCst);

                    let started = Instant::now();
                    envelope.unit.run(&registry, Arc::clone(&datastore)).await;
                    counters
                        .execute_micros
                        .fetch_add(started.elapsed().as_micros() as u64, Ordering::SeqCst);

                    counters.running.fetch_sub(1, Ordering::SeqCst);
                    counters.executed.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        info!(parallelism, "local executor started");
        Self {
            tx: StdMutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
            shutdown_outcome: Mutex::new(None),
            parallelism,
        }
    }
}

#[async_trait]
impl<S: Subject> Executor<S> for LocalExecutor<S> {
    async fn submit(&self, unit: ExecutionUnit<S>) -> Result<(), ExecutorError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(ExecutorError::ShutDown)?;

        self.counters.waiting.fetch_add(1, Ordering::SeqCst);
        tx.send(Envelope {
            unit,
            enqueued: Instant::now(),
        })
        .map_err(|_| {
            self.counters.waiting.fetch_sub(1, Ordering::SeqCst);
            ExecutorError::Rejected("worker pool queue closed".into())
        })
    }

    async fn shutdown(&self, grace: Duration) -> Result<bool, ExecutorError> {
        let mut outcome = self.shutdown_outcome.lock().await;
        if let Some(clean) = *outcome {
            return Ok(clean);
        }

        // Dropping the sender closes the queue; workers drain what is left
        // and exit.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        let clean = tokio::time::timeout(grace, futures::future::join_all(workers))
            .await
            .is_ok();

        info!(clean, "local executor stopped");
        *outcome = Some(clean);
        Ok(clean)
    }

    fn status(&self) -> ExecutorStatus {
        let executed = self.counters.executed.load(Ordering::SeqCst);
        let running = self.counters.running.load(Ordering::SeqCst);
        // Averages are over every unit dequeued so far.
        let dequeued = executed + running;
        let avg = |micros: u64| {
            if dequeued == 0 {
                0.0
            } else {
                micros as f64 / dequeued as f64 / 1_000.0
            }
        };

        ExecutorStatus {
            jobs_executed: executed,
            jobs_running: running,
            jobs_waiting: self.counters.waiting.load(Ordering::SeqCst),
            avg_wait_ms: avg(self.counters.wait_micros.load(Ordering::SeqCst)),
            avg_execute_ms: avg(self.counters.execute_micros.load(Ordering::SeqCst)),
            nodes: 1,
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            parallelism: self.parallelism,
        }
    }
}
