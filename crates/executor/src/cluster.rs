//! Distributed execution backend over ZeroMQ PUSH/PULL.
//!
//! The executor binds a PUSH socket and round-robins encoded units across
//! every connected [`UnitWorker`] process (automatic load balancing). Workers
//! send a small completion report per unit to the executor's ack PULL
//! socket; those reports drive the status counters and the live node set.
//!
//! Units carry only data, so a worker resolves detectors from its own
//! registry and talks to the store through its own handle — nothing is
//! shared with the scheduler process but the wire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend};

use vigil_core::{Datastore, DetectorRegistry, Subject};

use crate::error::ExecutorError;
use crate::status::ExecutorStatus;
use crate::traits::Executor;
use crate::transport::Transport;
use crate::unit::ExecutionUnit;

/// Completion report sent by a worker after each unit.
#[derive(Debug, Serialize, Deserialize)]
struct UnitReport {
    worker_id: String,
    cpus: usize,
    execute_ms: u64,
}

struct Queued {
    bytes: Vec<u8>,
    enqueued: Instant,
}

#[derive(Default)]
struct ClusterCounters {
    dispatched: AtomicU64,
    executed: AtomicU64,
    waiting: AtomicU64,
    wait_micros: AtomicU64,
    execute_ms_total: AtomicU64,
    /// Worker id → cpu count, learned from completion reports.
    workers: StdMutex<HashMap<String, usize>>,
}

/// Backend that dispatches units to remote `detection-worker` processes.
pub struct ClusterExecutor<S: Subject> {
    tx: StdMutex<Option<mpsc::UnboundedSender<Queued>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    ack_listener: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<ClusterCounters>,
    shutdown_outcome: Mutex<Option<bool>>,
    _subject: std::marker::PhantomData<fn() -> S>,
}

impl<S: Subject> ClusterExecutor<S> {
    /// Bind the dispatch PUSH socket and the ack PULL socket, then start the
    /// dispatcher and ack-listener tasks. Binding failure is fatal to
    /// controller startup.
    pub async fn bind(dispatch: &Transport, ack: &Transport) -> Result<Self, ExecutorError> {
        for transport in [dispatch, ack] {
            transport
                .ensure_ipc_dir()
                .map_err(|e| ExecutorError::Transport(e.to_string()))?;
            transport
                .remove_stale_socket()
                .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        }

        let mut push = PushSocket::new();
        push.bind(&dispatch.endpoint()).await?;
        let mut pull = PullSocket::new();
        pull.bind(&ack.endpoint()).await?;
        info!(dispatch = %dispatch, ack = %ack, "cluster executor bound");

        let counters = Arc::new(ClusterCounters::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<Queued>();

        let dispatcher = {
            let counters = Arc::clone(&counters);
            tokio::spawn(async move {
                while let Some(queued) = rx.recv().await {
                    counters.waiting.fetch_sub(1, Ordering::SeqCst);
                    counters.wait_micros.fetch_add(
                        queued.enqueued.elapsed().as_micros() as u64,
                        Ordering::SeqCst,
                    );
                    if let Err(e) = push.send(queued.bytes.into()).await {
                        warn!(error = %e, "failed to dispatch unit");
                        continue;
                    }
                    counters.dispatched.fetch_add(1, Ordering::SeqCst);
                }
                debug!("dispatch queue closed");
            })
        };

        let ack_listener = {
            let counters = Arc::clone(&counters);
            tokio::spawn(async move {
                loop {
                    match pull.recv().await {
                        Ok(raw) => {
                            let Some(frame) = raw.get(0) else {
                                warn!("empty ack frame");
                                continue;
                            };
                            match rmp_serde::from_slice::<UnitReport>(frame.as_ref()) {
                                Ok(report) => {
                                    counters.executed.fetch_add(1, Ordering::SeqCst);
                                    counters
                                        .execute_ms_total
                                        .fetch_add(report.execute_ms, Ordering::SeqCst);
                                    counters
                                        .workers
                                        .lock()
                                        .unwrap_or_else(PoisonError::into_inner)
                                        .insert(report.worker_id, report.cpus);
                                }
                                Err(e) => warn!(error = %e, "malformed unit report"),
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "ack socket error, listener exiting");
                            break;
                        }
                    }
                }
            })
        };

        Ok(Self {
            tx: StdMutex::new(Some(tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            ack_listener: Mutex::new(Some(ack_listener)),
            counters,
            shutdown_outcome: Mutex::new(None),
            _subject: std::marker::PhantomData,
        })
    }
}

#[async_trait]
impl<S: Subject> Executor<S> for ClusterExecutor<S> {
    async fn submit(&self, unit: ExecutionUnit<S>) -> Result<(), ExecutorError> {
        // Encode before enqueueing so a bad unit fails the submission, not
        // the dispatcher.
        let bytes = unit.to_bytes()?;

        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(ExecutorError::ShutDown)?;

        self.counters.waiting.fetch_add(1, Ordering::SeqCst);
        tx.send(Queued {
            bytes,
            enqueued: Instant::now(),
        })
        .map_err(|_| {
            self.counters.waiting.fetch_sub(1, Ordering::SeqCst);
            ExecutorError::Rejected("dispatch queue closed".into())
        })
    }

    async fn shutdown(&self, grace: Duration) -> Result<bool, ExecutorError> {
        let mut outcome = self.shutdown_outcome.lock().await;
        if let Some(clean) = *outcome {
            return Ok(clean);
        }

        let deadline = Instant::now() + grace;
        let mut clean = true;

        // Close the queue; the dispatcher flushes what is left and exits.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = self.dispatcher.lock().await.take() {
            clean &= tokio::time::timeout(
                deadline.saturating_duration_since(Instant::now()),
                handle,
            )
            .await
            .is_ok();
        }

        // Wait for remote completion reports to catch up with dispatches.
        loop {
            let dispatched = self.counters.dispatched.load(Ordering::SeqCst);
            let executed = self.counters.executed.load(Ordering::SeqCst);
            if executed >= dispatched {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    dispatched,
                    executed, "cluster drain deadline elapsed with units outstanding"
                );
                clean = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Some(handle) = self.ack_listener.lock().await.take() {
            handle.abort();
        }

        info!(clean, "cluster executor stopped");
        *outcome = Some(clean);
        Ok(clean)
    }

    fn status(&self) -> ExecutorStatus {
        let executed = self.counters.executed.load(Ordering::SeqCst);
        let dispatched = self.counters.dispatched.load(Ordering::SeqCst);
        let workers = self
            .counters
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let cpus: usize = workers.values().sum();

        ExecutorStatus {
            jobs_executed: executed,
            jobs_running: dispatched.saturating_sub(executed),
            jobs_waiting: self.counters.waiting.load(Ordering::SeqCst),
            avg_wait_ms: if dispatched == 0 {
                0.0
            } else {
                self.counters.wait_micros.load(Ordering::SeqCst) as f64
                    / dispatched as f64
                    / 1_000.0
            },
            avg_execute_ms: if executed == 0 {
                0.0
            } else {
                self.counters.execute_ms_total.load(Ordering::SeqCst) as f64 / executed as f64
            },
            nodes: workers.len(),
            cpus,
            parallelism: cpus,
        }
    }
}

/// Remote side of the cluster backend: pulls units, runs them against its
/// own registry and datastore handle, reports completions.
pub struct UnitWorker<S: Subject> {
    id: String,
    registry: Arc<DetectorRegistry<S>>,
    datastore: Arc<dyn Datastore<S>>,
    stop: Arc<Notify>,
}

impl<S: Subject> UnitWorker<S> {
    pub fn new(
        id: impl Into<String>,
        registry: Arc<DetectorRegistry<S>>,
        datastore: Arc<dyn Datastore<S>>,
    ) -> Self {
        Self {
            id: id.into(),
            registry,
            datastore,
            stop: Arc::new(Notify::new()),
        }
    }

    /// Handle for asking a running worker to stop after its current unit.
    pub fn stop_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.stop)
    }

    /// Connect to the executor's endpoints and process units until stopped.
    pub async fn run(&self, dispatch: &Transport, ack: &Transport) -> Result<(), ExecutorError> {
        let mut pull = PullSocket::new();
        pull.connect(&dispatch.endpoint()).await?;
        let mut push = PushSocket::new();
        push.connect(&ack.endpoint()).await?;

        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        info!(worker = %self.id, dispatch = %dispatch, "detection worker joined");

        loop {
            tokio::select! {
                _ = self.stop.notified() => {
                    info!(worker = %self.id, "detection worker stopping");
                    break;
                }
                received = pull.recv() => {
                    let raw = received?;
                    let Some(frame) = raw.get(0) else {
                        warn!(worker = %self.id, "empty ZMQ frame");
                        continue;
                    };
                    let unit = match ExecutionUnit::<S>::from_bytes(frame.as_ref()) {
                        Ok(unit) => unit,
                        Err(e) => {
                            warn!(worker = %self.id, error = %e, "malformed unit, skipping");
                            continue;
                        }
                    };

                    let started = Instant::now();
                    unit.run(&self.registry, Arc::clone(&self.datastore)).await;

                    let report = UnitReport {
                        worker_id: self.id.clone(),
                        cpus,
                        execute_ms: started.elapsed().as_millis() as u64,
                    };
                    let bytes = rmp_serde::to_vec(&report)?;
                    push.send(bytes.into()).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use vigil_core::{
        DetectionAgent, DetectionAgentProfile, DetectionError, Link, TriggerContext,
    };
    use vigil_datastore::MemoryDatastore;

    struct CountingAgent(Arc<AtomicUsize>);

    #[async_trait]
    impl DetectionAgent<Link> for CountingAgent {
        async fn analyze(
            &self,
            _subject: &Link,
            _trigger: &TriggerContext,
            _profile: &DetectionAgentProfile,
            _datastore: Arc<dyn Datastore<Link>>,
        ) -> Result<(), DetectionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting_registry(count: &Arc<AtomicUsize>) -> Arc<DetectorRegistry<Link>> {
        let mut registry = DetectorRegistry::new();
        let counter = Arc::clone(count);
        registry.register("counting", move |_| {
            Ok(Arc::new(CountingAgent(Arc::clone(&counter))) as _)
        });
        Arc::new(registry)
    }

    fn unit(n: usize) -> ExecutionUnit<Link> {
        ExecutionUnit::new(
            Link::new(format!("client-{n}"), "server"),
            TriggerContext::new("data", n as i64),
            DetectionAgentProfile::new("detection.test", "data", "counting"),
        )
    }

    #[tokio::test]
    async fn dispatch_execute_and_ack_roundtrip() {
        let dispatch = Transport::tcp("127.0.0.1", 15710);
        let ack = Transport::tcp("127.0.0.1", 15711);

        let executor: ClusterExecutor<Link> =
            ClusterExecutor::bind(&dispatch, &ack).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let count = Arc::new(AtomicUsize::new(0));
        let worker = UnitWorker::new(
            "worker-1",
            counting_registry(&count),
            Arc::new(MemoryDatastore::<Link>::new()),
        );
        let stop = worker.stop_handle();
        let worker_handle = {
            let dispatch = dispatch.clone();
            let ack = ack.clone();
            tokio::spawn(async move { worker.run(&dispatch, &ack).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        for n in 0..4 {
            executor.submit(unit(n)).await.unwrap();
        }

        let clean = executor.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(clean, "all dispatched units should be acknowledged");
        assert_eq!(count.load(Ordering::SeqCst), 4);

        let status = executor.status();
        assert_eq!(status.jobs_executed, 4);
        assert_eq!(status.jobs_running, 0);
        assert_eq!(status.nodes, 1);
        assert!(status.cpus >= 1);

        stop.notify_one();
        let _ = tokio::time::timeout(Duration::from_secs(1), worker_handle).await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let dispatch = Transport::tcp("127.0.0.1", 15712);
        let ack = Transport::tcp("127.0.0.1", 15713);

        let executor: ClusterExecutor<Link> =
            ClusterExecutor::bind(&dispatch, &ack).await.unwrap();
        executor.shutdown(Duration::from_millis(200)).await.unwrap();

        let err = executor.submit(unit(0)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ShutDown));
    }
}
