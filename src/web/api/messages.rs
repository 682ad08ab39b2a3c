//! API endpoints for sending, pulling and querying messages.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hub::{BroadcastRequest, Hub};
use crate::web::response::success;

type JsonBody = std::result::Result<Json<Value>, JsonRejection>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    pub agent_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub agent_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

/// Submit an envelope for routing.
pub async fn send_message(State(hub): State<Arc<Hub>>, body: JsonBody) -> Result<Json<Value>> {
    let Json(envelope) = body?;
    let outcome = hub.submit(envelope).await?;
    Ok(Json(serde_json::to_value(outcome)?))
}

/// Broadcast a subject/content pair to every live agent.
pub async fn broadcast(State(hub): State<Arc<Hub>>, body: JsonBody) -> Result<Json<Value>> {
    let Json(body) = body?;
    let request: BroadcastRequest =
        serde_json::from_value(body).map_err(|e| Error::invalid("body", e.to_string()))?;

    let outcome = hub.broadcast(request).await?;
    let Json(mut body) = success(&outcome)?;
    body["broadcast"] = json!(true);
    Ok(Json(body))
}

/// Destructive pull of an agent's queue.
pub async fn pull_messages(
    State(hub): State<Arc<Hub>>,
    query: std::result::Result<Query<PullQuery>, QueryRejection>,
) -> Result<Json<Value>> {
    let Query(query) = query?;
    let agent_id = match query.agent_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => return Err(Error::invalid("agentId", "is required")),
    };

    let messages = hub.pull(&agent_id, query.limit);
    Ok(Json(json!({
        "success": true,
        "agentId": agent_id,
        "count": messages.len(),
        "messages": messages,
    })))
}

/// Stored history, newest first.
pub async fn history(
    State(hub): State<Arc<Hub>>,
    query: std::result::Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Value>> {
    let Query(query) = query?;
    let messages = hub.history(query.agent_id, query.limit).await?;
    Ok(Json(json!({
        "success": true,
        "count": messages.len(),
        "messages": messages,
    })))
}

/// Case-insensitive text search over stored history.
pub async fn search(
    State(hub): State<Arc<Hub>>,
    query: std::result::Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<Value>> {
    let Query(query) = query?;
    let messages = hub.search(query.q, query.limit).await?;
    Ok(Json(json!({
        "success": true,
        "count": messages.len(),
        "messages": messages,
    })))
}

pub async fn stats(State(hub): State<Arc<Hub>>) -> Result<Json<Value>> {
    let stats = hub.stats().await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

/// A single stored message by id.
pub async fn get_message(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let message = hub.stored(&id).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

/// Mark a stored message as read.
pub async fn mark_read(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let message = hub.mark_read(&id).await?;
    Ok(Json(json!({
        "success": true,
        "messageId": message.store_id,
        "read": message.read,
    })))
}
