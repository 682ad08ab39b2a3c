//! Configuration for the Pheromone hub.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::dispatcher::RetryPolicy;
use crate::core::queue::DEFAULT_QUEUE_CAPACITY;
use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 18888;

/// Hub settings. Every field has a default, so a partial JSON file is valid.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    /// Root for `messages/` and `logs/`. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub queue_capacity: usize,
    pub retention_days: u64,
    pub retention_sweep_interval_ms: u64,
    pub callback_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_turns: u64,
    pub enforce_permissions: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            data_dir: None,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retention_days: 30,
            retention_sweep_interval_ms: 60_000,
            callback_timeout_ms: 10_000,
            max_retries: 3,
            retry_base_delay_ms: 2_000,
            max_turns: 20,
            enforce_permissions: false,
        }
    }
}

impl HubConfig {
    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config: HubConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queueCapacity must be at least 1".to_string()));
        }
        if self.heartbeat_interval_ms == 0 || self.retention_sweep_interval_ms == 0 {
            return Err(Error::Config("sweep intervals must be greater than zero".to_string()));
        }
        if self.callback_timeout_ms == 0 {
            return Err(Error::Config("callbackTimeoutMs must be greater than zero".to_string()));
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(Error::Config(format!(
                "heartbeatTimeoutMs ({}) must exceed heartbeatIntervalMs ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        Ok(())
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }

    pub fn messages_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("messages"))
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("logs"))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.retention_sweep_interval_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }
}

/// Platform data directory for the hub.
pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "pheromone", "pheromone-hub")
        .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;
    Ok(dirs.data_dir().to_path_buf())
}
