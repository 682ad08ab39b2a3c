//! Route definitions for the hub's HTTP API.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::api;
use crate::hub::Hub;

/// Create the API router.
pub fn create_api_router() -> Router<Arc<Hub>> {
    Router::new()
        // Agents
        .route("/register", post(api::register))
        .route("/heartbeat", post(api::heartbeat))
        .route("/agents", get(api::list_agents))
        .route("/agents/:id", get(api::get_agent).delete(api::delete_agent))

        // Messages
        .route("/message", post(api::send_message))
        .route("/broadcast", post(api::broadcast))
        .route("/messages", get(api::pull_messages))
        .route("/messages/history", get(api::history))
        .route("/messages/search", get(api::search))
        .route("/messages/stats", get(api::stats))
        .route("/messages/:id", get(api::get_message))
        .route("/messages/:id/read", post(api::mark_read))

        .route("/health", get(api::health))
}

/// Create the full app router bound to a hub.
pub fn create_app_router(hub: Arc<Hub>) -> Router {
    create_api_router().with_state(hub)
}
