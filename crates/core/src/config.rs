use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between scheduler ticks.
    pub update_interval_secs: u64,
    pub executor: ExecutorConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    ///
    /// Fails only on values that make the pipeline unrunnable; unknown or
    /// unset keys fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let update_interval_secs = env_u64("UPDATE_INTERVAL", 10);
        if update_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "UPDATE_INTERVAL".into(),
                value: "0".into(),
            });
        }
        Ok(Self {
            update_interval_secs,
            executor: ExecutorConfig::from_env()?,
        })
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  update interval: {}s", self.update_interval_secs);
        tracing::info!(
            "  executor:        mode={}, parallelism={}",
            self.executor.mode,
            self.executor.parallelism
        );
        if self.executor.mode == ExecutorMode::Cluster {
            tracing::info!(
                "  dispatch:        {}:{} (acks on :{})",
                self.executor.dispatch_host,
                self.executor.dispatch_port,
                self.executor.ack_port
            );
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval_secs: 10,
            executor: ExecutorConfig::default(),
        }
    }
}

// ── Executor ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    /// In-process worker pool. Single node, also used by tests.
    Local,
    /// ZeroMQ dispatch to detection-worker processes.
    Cluster,
}

impl std::fmt::Display for ExecutorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorMode::Local => write!(f, "local"),
            ExecutorMode::Cluster => write!(f, "cluster"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub mode: ExecutorMode,
    /// Worker tasks in the local pool.
    pub parallelism: usize,
    pub dispatch_host: String,
    pub dispatch_port: u16,
    /// Port the cluster executor listens on for per-unit completion reports.
    pub ack_port: u16,
}

impl ExecutorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mode = match env_or("EXECUTOR_MODE", "local").to_lowercase().as_str() {
            "local" => ExecutorMode::Local,
            "cluster" => ExecutorMode::Cluster,
            other => {
                return Err(ConfigError::Invalid {
                    key: "EXECUTOR_MODE".into(),
                    value: other.to_string(),
                })
            }
        };
        Ok(Self {
            mode,
            parallelism: env_u64("EXECUTOR_PARALLELISM", default_parallelism() as u64) as usize,
            dispatch_host: env_or("DISPATCH_HOST", "127.0.0.1"),
            dispatch_port: env_u16("DISPATCH_PORT", 5555),
            ack_port: env_u16("ACK_PORT", 5556),
        })
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::Local,
            parallelism: default_parallelism(),
            dispatch_host: "127.0.0.1".into(),
            dispatch_port: 5555,
            ack_port: 5556,
        }
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_runnable() {
        let config = Config::default();
        assert_eq!(config.update_interval(), Duration::from_secs(10));
        assert_eq!(config.executor.mode, ExecutorMode::Local);
        assert!(config.executor.parallelism >= 1);
    }

    #[test]
    fn executor_mode_display() {
        assert_eq!(ExecutorMode::Local.to_string(), "local");
        assert_eq!(ExecutorMode::Cluster.to_string(), "cluster");
    }
}
