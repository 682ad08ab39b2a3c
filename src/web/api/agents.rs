//! API endpoints for agent registration, liveness and lookup.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hub::{HeartbeatUpdate, Hub};
use crate::protocol::AgentStatus;
use crate::web::response::success;

/// Register (or re-register) an agent.
pub async fn register(
    State(hub): State<Arc<Hub>>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let agent = body
        .get("agent")
        .ok_or_else(|| Error::invalid("agent", "is required"))?;

    let registration = hub.register_agent(agent)?;
    success(&registration)
}

/// Heartbeat; the response carries the agent's drained queue.
///
/// `currentTask` sets the agent's task, `null` clears it, and leaving it
/// out keeps the previous value.
pub async fn heartbeat(
    State(hub): State<Arc<Hub>>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let agent_id = match body.get("agentId").and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => id,
        _ => return Err(Error::invalid("agentId", "is required")),
    };
    let status = match body.get("status") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            s.parse::<AgentStatus>()
                .map_err(|e| Error::invalid("status", e))?,
        ),
        Some(_) => return Err(Error::invalid("status", "must be a string")),
    };
    let current_task = match body.get("currentTask") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(Value::String(task)) => Some(Some(task.clone())),
        Some(_) => return Err(Error::invalid("currentTask", "must be a string or null")),
    };

    let outcome = hub.heartbeat(
        agent_id,
        HeartbeatUpdate {
            status,
            current_task,
        },
    )?;
    success(&outcome)
}

/// List all agents.
pub async fn list_agents(State(hub): State<Arc<Hub>>) -> Json<Value> {
    let agents = hub.agents();
    Json(json!({
        "success": true,
        "count": agents.len(),
        "agents": agents,
    }))
}

/// Get a single agent.
pub async fn get_agent(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Result<Json<Value>> {
    let agent = hub.agent(&id)?;
    Ok(Json(json!({ "success": true, "agent": agent })))
}

/// Unregister an agent.
pub async fn delete_agent(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Result<Json<Value>> {
    hub.unregister(&id)?;
    Ok(Json(json!({ "success": true, "agentId": id })))
}
