//! API endpoints module.

pub mod agents;
pub mod health;
pub mod messages;

pub use agents::{delete_agent, get_agent, heartbeat, list_agents, register};
pub use health::health;
pub use messages::{
    broadcast, get_message, history, mark_read, pull_messages, search, send_message, stats,
};
