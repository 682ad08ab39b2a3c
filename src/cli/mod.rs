//! CLI commands for the Pheromone hub using clap.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{HubConfig, DEFAULT_PORT};
use crate::core::store::MessageStore;
use crate::hub::Hub;
use crate::logging;

/// Pheromone - message hub for a swarm of cooperating agents.
#[derive(Parser)]
#[command(name = "pheromone-hub")]
#[command(version)]
#[command(about = "Pheromone - agent mailbox hub", long_about = None)]
pub struct Commands {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the hub server
    Serve(ServeArgs),

    /// Delete stored history older than N days
    Cleanup {
        /// Maximum age in days
        #[arg(long, default_value_t = 30)]
        days: u64,

        /// Data directory
        #[arg(long, env = "HUB_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Query a running hub's health endpoint
    Status {
        /// Hub base URL
        #[arg(long, default_value_t = format!("http://127.0.0.1:{}", DEFAULT_PORT))]
        url: String,
    },
}

/// Flags for `serve`. Each overrides the config file when set.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// JSON config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "HUB_HOST")]
    pub host: Option<String>,

    #[arg(long, short, env = "HUB_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "HUB_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, env = "HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: Option<u64>,

    #[arg(long, env = "HEARTBEAT_TIMEOUT_MS")]
    pub heartbeat_timeout_ms: Option<u64>,

    #[arg(long, env = "QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    #[arg(long, env = "RETENTION_DAYS")]
    pub retention_days: Option<u64>,

    #[arg(long, env = "RETENTION_SWEEP_INTERVAL_MS")]
    pub retention_sweep_interval_ms: Option<u64>,

    #[arg(long, env = "CALLBACK_TIMEOUT_MS")]
    pub callback_timeout_ms: Option<u64>,

    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: Option<u64>,

    #[arg(long, env = "MAX_TURNS")]
    pub max_turns: Option<u64>,

    #[arg(long, env = "ENFORCE_PERMISSIONS")]
    pub enforce_permissions: Option<bool>,
}

impl ServeArgs {
    /// Resolve the effective config: file (or defaults), then flags/env.
    pub fn resolve(&self) -> Result<HubConfig> {
        let mut config = match &self.config {
            Some(path) => HubConfig::load(path)?,
            None => HubConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            config.heartbeat_interval_ms = ms;
        }
        if let Some(ms) = self.heartbeat_timeout_ms {
            config.heartbeat_timeout_ms = ms;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(days) = self.retention_days {
            config.retention_days = days;
        }
        if let Some(ms) = self.retention_sweep_interval_ms {
            config.retention_sweep_interval_ms = ms;
        }
        if let Some(ms) = self.callback_timeout_ms {
            config.callback_timeout_ms = ms;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(ms) = self.retry_base_delay_ms {
            config.retry_base_delay_ms = ms;
        }
        if let Some(turns) = self.max_turns {
            config.max_turns = turns;
        }
        if let Some(enforce) = self.enforce_permissions {
            config.enforce_permissions = enforce;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Serve(args) => cmd_serve(args).await,
            Command::Cleanup { days, data_dir } => cmd_cleanup(*days, data_dir.clone()).await,
            Command::Status { url } => cmd_status(url).await,
        }
    }
}

async fn cmd_serve(args: &ServeArgs) -> Result<()> {
    let config = args.resolve()?;
    let _guard = logging::init(&config.log_dir()?)?;

    tracing::info!(
        port = config.port,
        data_dir = %config.data_dir()?.display(),
        enforce_permissions = config.enforce_permissions,
        "Starting Pheromone hub"
    );

    let hub = Arc::new(Hub::new(config)?);
    crate::web::run_server(hub).await?;
    Ok(())
}

async fn cmd_cleanup(days: u64, data_dir: Option<PathBuf>) -> Result<()> {
    logging::init_console()?;
    let config = HubConfig {
        data_dir,
        ..HubConfig::default()
    };
    let dir = config.messages_dir()?;

    let deleted = tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut store = MessageStore::open(&dir)
            .with_context(|| format!("Failed to open store at {}", dir.display()))?;
        Ok(store.cleanup(days)?)
    })
    .await??;

    println!("Deleted {} message(s) older than {} day(s)", deleted, days);
    Ok(())
}

async fn cmd_status(url: &str) -> Result<()> {
    logging::init_console()?;
    let endpoint = format!("{}/health", url.trim_end_matches('/'));
    let response = reqwest::get(&endpoint)
        .await
        .with_context(|| format!("Hub not reachable at {}", url))?;
    let health: serde_json::Value = response.error_for_status()?.json().await?;

    println!("Hub:     {}", url);
    println!("Status:  {}", health["status"].as_str().unwrap_or("unknown"));
    println!("Uptime:  {}s", health["uptime"]);
    println!("Agents:  {}", health["agents"]);
    println!(
        "Queued:  {}   Stored: {}",
        health["messages"]["queued"], health["messages"]["stored"]
    );
    Ok(())
}
