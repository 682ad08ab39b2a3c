//! Message envelopes exchanged between agents through the hub.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::types::{AgentRole, MessageKind};

/// Protocol version stamped on envelopes the hub creates itself.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// The structured message unit routed by the hub.
///
/// Fields the hub does not interpret are kept in `extra` so that queued and
/// stored copies are faithful to what the sender posted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Unique message ID
    #[serde(default)]
    pub id: String,
    /// Wire type, `<namespace>.<verb>`
    #[serde(rename = "type")]
    pub kind: String,
    /// Semver protocol version
    pub version: String,
    /// Sender-supplied timestamp (ISO 8601)
    pub timestamp: String,
    pub sender: Sender,
    /// `None` means broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Recipient>,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EnvelopeMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Identity of the agent that sent an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sender {
    pub id: String,
    pub role: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Sender {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            extra: Map::new(),
        }
    }
}

/// Addressing of an envelope: a single agent or every agent of a role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Recipient {
    Role(RoleTarget),
    Agent(AgentTarget),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleTarget {
    #[serde(rename = "type")]
    pub kind: RoleTag,
    pub target: String,
}

/// Discriminator for role-targeted recipients (`{"type": "role", ...}`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoleTag {
    #[serde(rename = "role")]
    Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTarget {
    pub id: String,
}

impl Recipient {
    pub fn agent(id: impl Into<String>) -> Self {
        Recipient::Agent(AgentTarget { id: id.into() })
    }

    pub fn role(role: AgentRole) -> Self {
        Recipient::Role(RoleTarget {
            kind: RoleTag::Role,
            target: role.as_str().to_string(),
        })
    }

    /// The addressed agent id, if this is a direct recipient.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Recipient::Agent(target) => Some(&target.id),
            Recipient::Role(_) => None,
        }
    }
}

/// Optional routing metadata carried by an envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Conversation turn, incremented by senders. Used as a loop breaker only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
    /// Seconds a queued copy stays deliverable; 0 or absent never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Informational only; delivery order is FIFO.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope stamped with a fresh id, the current time and the
    /// hub's protocol version. Without a recipient it is a broadcast.
    pub fn new(kind: MessageKind, sender: Sender, payload: Value) -> Self {
        Self {
            id: generate_id(),
            kind: kind.as_str().to_string(),
            version: PROTOCOL_VERSION.to_string(),
            timestamp: current_timestamp(),
            sender,
            recipient: None,
            payload,
            metadata: None,
            extra: Map::new(),
        }
    }

    /// Address to a single agent.
    pub fn to_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.recipient = Some(Recipient::agent(agent_id));
        self
    }

    /// Address to every agent registered with `role`.
    pub fn to_role(mut self, role: AgentRole) -> Self {
        self.recipient = Some(Recipient::role(role));
        self
    }

    /// Set the conversation turn.
    pub fn with_turn(mut self, turn: u64) -> Self {
        self.metadata.get_or_insert_with(Default::default).turn = Some(turn);
        self
    }

    /// Set a TTL in seconds.
    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.metadata.get_or_insert_with(Default::default).ttl = Some(ttl_seconds);
        self
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.metadata.get_or_insert_with(Default::default).correlation_id = Some(id.into());
        self
    }

    pub fn message_kind(&self) -> Option<MessageKind> {
        MessageKind::parse(&self.kind)
    }

    pub fn turn(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|m| m.turn)
    }

    /// Queue lifetime, if the sender asked for one.
    pub fn ttl(&self) -> Option<Duration> {
        self.metadata
            .as_ref()
            .and_then(|m| m.ttl)
            .filter(|ttl| *ttl > 0)
            .map(Duration::from_secs)
    }

    pub fn recipient_id(&self) -> Option<&str> {
        self.recipient.as_ref().and_then(Recipient::agent_id)
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }
}

/// Generate a message id.
pub fn generate_id() -> String {
    format!("msg-{}", ulid::Ulid::new())
}

/// Current time as an RFC 3339 string with millisecond precision.
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_creation() {
        let envelope = Envelope::new(
            MessageKind::MessageDirect,
            Sender::new("alice", "developer"),
            json!({"content": "hi"}),
        )
        .to_agent("bob")
        .with_turn(3);

        assert!(envelope.id.starts_with("msg-"));
        assert_eq!(envelope.kind, "message.direct");
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert_eq!(envelope.recipient_id(), Some("bob"));
        assert_eq!(envelope.turn(), Some(3));
        assert!(!envelope.is_broadcast());
    }

    #[test]
    fn test_recipient_shapes() {
        let direct: Recipient = serde_json::from_value(json!({"id": "bob"})).unwrap();
        assert_eq!(direct, Recipient::agent("bob"));

        let role: Recipient =
            serde_json::from_value(json!({"type": "role", "target": "reviewer"})).unwrap();
        assert_eq!(role, Recipient::role(AgentRole::Reviewer));
        assert_eq!(role.agent_id(), None);
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let raw = json!({
            "id": "m1",
            "type": "task.assign",
            "version": "1.0.0",
            "timestamp": "2026-01-01T00:00:00.000Z",
            "sender": {"id": "boss", "role": "manager", "name": "The Boss"},
            "recipient": {"id": "dev-1"},
            "payload": {"task": "write tests"},
            "metadata": {"turn": 2, "traceId": "t-9"},
            "channel": "ops"
        });

        let envelope: Envelope = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(envelope.extra.get("channel"), Some(&json!("ops")));
        assert_eq!(envelope.sender.extra.get("name"), Some(&json!("The Boss")));
        assert_eq!(serde_json::to_value(&envelope).unwrap(), raw);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let sender = Sender::new("a", "tester");
        let envelope = Envelope::new(MessageKind::MessageBroadcast, sender.clone(), json!({}));
        assert!(envelope.ttl().is_none());
        assert!(envelope.clone().with_ttl(0).ttl().is_none());
        assert_eq!(envelope.with_ttl(5).ttl(), Some(Duration::from_secs(5)));
    }
}
