//! Health check endpoint.

use axum::{extract::State, Json};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::hub::Hub;
use crate::web::response::success;

pub async fn health(State(hub): State<Arc<Hub>>) -> Result<Json<Value>> {
    let report = hub.health().await?;
    success(&report)
}
