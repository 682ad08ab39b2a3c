//! Pheromone hub library root.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod web;

pub use cli::Commands;
pub use config::HubConfig;
pub use error::{Error, Result};
pub use hub::Hub;
pub use web::{build_app, run_server};
