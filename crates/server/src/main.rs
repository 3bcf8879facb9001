//! vigil-server — runs the detection pipeline until interrupted.
//!
//! The stock binary wires the pipeline for [`Link`] subjects with an empty
//! detector registry; embedding applications register their detectors and
//! profiles through the library API instead.

use clap::Parser;
use tracing::info;

use vigil_core::{Config, ConfigError, DetectorRegistry, Link};
use vigil_server::Server;

/// Continuously-running detection pipeline server.
#[derive(Parser, Debug)]
#[command(name = "vigil-server", version, about)]
struct Cli {
    /// Seconds between scheduler ticks (overrides UPDATE_INTERVAL).
    #[arg(long)]
    update_interval: Option<u64>,
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
    vigil_core::config::load_dotenv();

    let mut config = Config::from_env()?;
    if let Some(secs) = cli.update_interval {
        if secs == 0 {
            return Err(ConfigError::Invalid {
                key: "--update-interval".into(),
                value: "0".into(),
            }
            .into());
        }
        config.update_interval_secs = secs;
    }
    config.log_summary();

    let registry: DetectorRegistry<Link> = DetectorRegistry::new();
    let server = Server::new(config, registry).await?;
    server.start()?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    server.stop().await;

    Ok(())
}
