//! Server facade: wires config → datastore → registry → executor →
//! activation controller, and exposes the controller surface to the host
//! process.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use vigil_activation::{ActivationController, EventBuffer};
use vigil_core::{
    Config, Datastore, DatastoreError, DetectionAgentProfile, DetectorRegistry, Evidence,
    ExecutorMode, RawData, Subject,
};
use vigil_datastore::MemoryDatastore;
use vigil_executor::{ClusterExecutor, Executor, ExecutorStatus, LocalExecutor, Transport};

/// One running detection pipeline.
///
/// Construction wires the collaborators; `start()` begins ticking. Startup
/// failures (invalid config, executor bind failure) are fatal; everything
/// after that is contained per profile, per unit, or per detector run.
pub struct Server<S: Subject> {
    config: Config,
    datastore: Arc<MemoryDatastore<S>>,
    registry: Arc<DetectorRegistry<S>>,
    controller: Arc<ActivationController<S>>,
}

impl<S: Subject> Server<S> {
    /// Build the pipeline. The executor variant comes from
    /// `config.executor.mode`; binding the cluster sockets can fail, which
    /// aborts startup.
    pub async fn new(config: Config, registry: DetectorRegistry<S>) -> anyhow::Result<Self> {
        let registry = Arc::new(registry);
        let datastore = Arc::new(MemoryDatastore::new());
        let buffer = Arc::new(EventBuffer::new());
        // Feedback edge: every store write re-enters the buffer.
        datastore.set_notifier(Arc::clone(&buffer) as _);

        let executor: Arc<dyn Executor<S>> = match config.executor.mode {
            ExecutorMode::Local => Arc::new(LocalExecutor::new(
                config.executor.parallelism,
                Arc::clone(&registry),
                Arc::clone(&datastore) as Arc<dyn Datastore<S>>,
            )),
            ExecutorMode::Cluster => {
                let dispatch = Transport::tcp(
                    config.executor.dispatch_host.clone(),
                    config.executor.dispatch_port,
                );
                let ack = Transport::tcp(
                    config.executor.dispatch_host.clone(),
                    config.executor.ack_port,
                );
                Arc::new(
                    ClusterExecutor::<S>::bind(&dispatch, &ack)
                        .await
                        .context("failed to start cluster executor")?,
                )
            }
        };

        let controller = Arc::new(ActivationController::new(
            buffer,
            executor,
            config.update_interval(),
        ));

        Ok(Self {
            config,
            datastore,
            registry,
            controller,
        })
    }

    /// Validate profiles against the registry and start the tick loop.
    pub fn start(&self) -> anyhow::Result<()> {
        let invalid = self.controller.check_profiles(&self.registry);
        if !invalid.is_empty() {
            warn!(
                count = invalid.len(),
                "some profiles do not resolve and will never run"
            );
        }
        Arc::clone(&self.controller).start()?;
        info!("server started");
        Ok(())
    }

    /// Stop ticking, then drain the backend. Returns whether the drain was
    /// clean.
    pub async fn stop(&self) -> bool {
        let clean = self.controller.stop().await;
        info!(clean, "server stopped");
        clean
    }

    /// Wait for the tick loop to terminate, up to `timeout`.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        self.controller.await_termination(timeout).await
    }

    // ── Controller surface ────────────────────────────────────

    /// Store a raw data record; the write notifies the scheduler.
    pub async fn add_raw_data(&self, data: RawData<S>) -> Result<(), DatastoreError> {
        self.datastore.add_raw_data(data).await
    }

    /// Store an evidence record; the write notifies the scheduler.
    pub async fn add_evidence(&self, evidence: Evidence<S>) -> Result<(), DatastoreError> {
        self.datastore.add_evidence(evidence).await
    }

    pub fn add_agent(&self, profile: DetectionAgentProfile) {
        self.controller.add_agent(profile);
    }

    pub fn profiles(&self) -> Vec<DetectionAgentProfile> {
        self.controller.profiles()
    }

    /// Cumulative number of execution units submitted to the backend.
    pub fn task_count(&self) -> u64 {
        self.controller.task_count()
    }

    pub fn backend_status(&self) -> ExecutorStatus {
        self.controller.executor_status()
    }

    /// Backend status rendered under the stable `executor.*` keys.
    pub fn backend_status_map(&self) -> BTreeMap<String, serde_json::Value> {
        self.backend_status().to_map()
    }

    pub fn datastore(&self) -> Arc<MemoryDatastore<S>> {
        Arc::clone(&self.datastore)
    }

    pub fn controller(&self) -> Arc<ActivationController<S>> {
        Arc::clone(&self.controller)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
