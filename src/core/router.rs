//! Type-based routing of accepted envelopes.
//!
//! Routing rules:
//! - `handshake.register` and `status.heartbeat` are acknowledged only
//! - `task.*` and `message.direct` go to a direct or role-targeted recipient
//! - `message.broadcast` fans out to every live agent except the sender
//! - `status.sync` answers with a roster snapshot

use serde::Serialize;
use std::sync::Arc;

use super::dispatcher::{CallbackDispatcher, DeliveryReport};
use super::registry::AgentRegistry;
use crate::protocol::{AgentRole, AgentStatus, Envelope, MessageKind, Recipient};

/// Roster entry returned by `status.sync`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RosterEntry {
    pub id: String,
    pub role: AgentRole,
    pub name: String,
    pub status: AgentStatus,
    #[serde(rename = "currentTask", skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub capabilities: Vec<String>,
}

/// Result of routing one envelope.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<DeliveryReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<RosterEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
}

impl RouteOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn acknowledged() -> Self {
        Self {
            success: true,
            acknowledged: Some(true),
            ..Default::default()
        }
    }

    fn single(report: DeliveryReport) -> Self {
        Self {
            success: true,
            delivered: Some(report.delivered),
            queued: Some(report.queued),
            reason: report.reason,
            ..Default::default()
        }
    }

    fn fan_out(results: Vec<DeliveryReport>) -> Self {
        Self {
            success: true,
            delivered: Some(results.iter().any(|r| r.delivered)),
            queued: Some(results.iter().any(|r| r.queued)),
            results: Some(results),
            ..Default::default()
        }
    }
}

/// Routes envelopes to agents through the dispatcher.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<AgentRegistry>,
    dispatcher: CallbackDispatcher,
}

impl MessageRouter {
    pub fn new(registry: Arc<AgentRegistry>, dispatcher: CallbackDispatcher) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    pub async fn route(&self, envelope: &Envelope) -> RouteOutcome {
        let Some(kind) = envelope.message_kind() else {
            return RouteOutcome::failure(format!("Unknown message type: {}", envelope.kind));
        };

        tracing::debug!(message_id = %envelope.id, kind = %kind, sender = %envelope.sender.id, "Routing message");

        match kind {
            MessageKind::HandshakeRegister | MessageKind::StatusHeartbeat => RouteOutcome::acknowledged(),
            MessageKind::MessageBroadcast => {
                let results = self
                    .dispatcher
                    .push_broadcast(envelope, Some(&envelope.sender.id))
                    .await;
                RouteOutcome::fan_out(results)
            }
            MessageKind::StatusSync => self.sync(),
            kind if kind.requires_recipient() => self.route_addressed(envelope).await,
            kind => RouteOutcome::failure(format!("Unknown message type: {}", kind)),
        }
    }

    async fn route_addressed(&self, envelope: &Envelope) -> RouteOutcome {
        match &envelope.recipient {
            None => RouteOutcome::failure(format!("Message type {} requires a recipient", envelope.kind)),
            Some(Recipient::Agent(target)) => {
                RouteOutcome::single(self.dispatcher.push(&target.id, envelope).await)
            }
            Some(Recipient::Role(target)) => {
                let Ok(role) = target.target.parse::<AgentRole>() else {
                    return RouteOutcome::failure(format!("Unknown role: {}", target.target));
                };
                let agents = self.registry.get_by_role(role);
                if agents.is_empty() {
                    return RouteOutcome::failure(format!("No agents registered with role: {}", role));
                }

                let mut results = Vec::with_capacity(agents.len());
                for agent in agents {
                    results.push(self.dispatcher.push(&agent.id, envelope).await);
                }
                RouteOutcome::fan_out(results)
            }
        }
    }

    fn sync(&self) -> RouteOutcome {
        let agents = self
            .registry
            .get_all()
            .into_iter()
            .map(|agent| RosterEntry {
                name: agent.display_name().to_string(),
                id: agent.id,
                role: agent.role,
                status: agent.status,
                current_task: agent.current_task,
                capabilities: agent.capabilities.into_iter().collect(),
            })
            .collect();

        RouteOutcome {
            success: true,
            agents: Some(agents),
            sync_token: Some(format!("sync-{}", ulid::Ulid::new())),
            ..Default::default()
        }
    }
}
