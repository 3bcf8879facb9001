//! detection-worker — remote execution node for the cluster backend.
//!
//! Connects to a vigil-server's dispatch endpoint, pulls execution units,
//! runs them against its local detector registry, and reports completions.
//! The stock binary carries an empty registry and the in-memory store;
//! deployments embed this loop with their own detectors and a handle to the
//! shared store.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use vigil_core::{DetectorRegistry, Link};
use vigil_datastore::MemoryDatastore;
use vigil_executor::{Transport, UnitWorker};

/// Cluster worker for the detection pipeline.
#[derive(Parser, Debug)]
#[command(name = "detection-worker", version, about)]
struct Cli {
    /// Identifier reported with each completed unit.
    #[arg(long, env = "WORKER_ID", default_value = "worker-1")]
    worker_id: String,

    /// Host of the vigil-server dispatch endpoint.
    #[arg(long, env = "DISPATCH_HOST", default_value = "127.0.0.1")]
    dispatch_host: String,

    /// Port the server PUSHes units on.
    #[arg(long, env = "DISPATCH_PORT", default_value_t = 5555)]
    dispatch_port: u16,

    /// Port the server listens on for completion reports.
    #[arg(long, env = "ACK_PORT", default_value_t = 5556)]
    ack_port: u16,
}

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
    let dispatch = Transport::tcp(cli.dispatch_host.clone(), cli.dispatch_port);
    let ack = Transport::tcp(cli.dispatch_host, cli.ack_port);

    let registry: Arc<DetectorRegistry<Link>> = Arc::new(DetectorRegistry::new());
    let datastore = Arc::new(MemoryDatastore::<Link>::new());

    let worker = UnitWorker::new(cli.worker_id, registry, datastore);
    let stop = worker.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            stop.notify_one();
        }
    });

    worker.run(&dispatch, &ack).await?;
    Ok(())
}
