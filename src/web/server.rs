//! HTTP server using Axum.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::router::create_app_router;
use crate::error::{Error, Result};
use crate::heartbeat::spawn_sweepers;
use crate::hub::Hub;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Router with the hub's middleware stack applied.
pub fn build_app(hub: Arc<Hub>) -> Router {
    create_app_router(hub)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AnyOrigin)
                .allow_methods(AnyOrigin)
                .allow_headers(AnyOrigin),
        )
}

/// Run the hub until Ctrl-C, then stop the sweepers and drain retries.
pub async fn run_server(hub: Arc<Hub>) -> Result<()> {
    let addr: SocketAddr = hub
        .config()
        .bind_addr()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

    let shutdown = CancellationToken::new();
    let sweepers = TaskTracker::new();
    spawn_sweepers(Arc::clone(&hub), &sweepers, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Pheromone hub listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, build_app(Arc::clone(&hub)))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    sweepers.close();
    sweepers.wait().await;
    hub.shutdown().await;

    tracing::info!("Pheromone hub stopped");
    Ok(())
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("Handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "error": "Internal server error",
            "code": "internal_error",
        })),
    )
        .into_response()
}
