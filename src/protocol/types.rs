//! Enumerations shared by the hub protocol: agent roles, agent status and
//! the envelope type grammar.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Roles an agent may register under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Manager,
    Coordinator,
    Developer,
    Reviewer,
    Tester,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Manager,
        AgentRole::Coordinator,
        AgentRole::Developer,
        AgentRole::Reviewer,
        AgentRole::Tester,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Manager => "manager",
            AgentRole::Coordinator => "coordinator",
            AgentRole::Developer => "developer",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Tester => "tester",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manager" => Ok(AgentRole::Manager),
            "coordinator" => Ok(AgentRole::Coordinator),
            "developer" => Ok(AgentRole::Developer),
            "reviewer" => Ok(AgentRole::Reviewer),
            "tester" => Ok(AgentRole::Tester),
            _ => Err(format!("Unknown agent role: {}", s)),
        }
    }
}

/// Liveness / availability status of an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Online,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "busy" => Ok(AgentStatus::Busy),
            "online" => Ok(AgentStatus::Online),
            "offline" => Ok(AgentStatus::Offline),
            _ => Err(format!("Unknown agent status: {}", s)),
        }
    }
}

/// Envelope namespaces accepted by the type grammar `<namespace>.<verb>`.
pub const NAMESPACES: [&str; 4] = ["task", "message", "status", "handshake"];

/// Envelope types the router knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    HandshakeRegister,
    StatusHeartbeat,
    StatusSync,
    TaskAssign,
    TaskUpdate,
    TaskComplete,
    TaskFail,
    MessageDirect,
    MessageBroadcast,
}

impl MessageKind {
    /// Parse a wire type such as `task.assign`. Returns `None` for types that
    /// pass the grammar but have no route.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "handshake.register" => Some(MessageKind::HandshakeRegister),
            "status.heartbeat" => Some(MessageKind::StatusHeartbeat),
            "status.sync" => Some(MessageKind::StatusSync),
            "task.assign" => Some(MessageKind::TaskAssign),
            "task.update" => Some(MessageKind::TaskUpdate),
            "task.complete" => Some(MessageKind::TaskComplete),
            "task.fail" => Some(MessageKind::TaskFail),
            "message.direct" => Some(MessageKind::MessageDirect),
            "message.broadcast" => Some(MessageKind::MessageBroadcast),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::HandshakeRegister => "handshake.register",
            MessageKind::StatusHeartbeat => "status.heartbeat",
            MessageKind::StatusSync => "status.sync",
            MessageKind::TaskAssign => "task.assign",
            MessageKind::TaskUpdate => "task.update",
            MessageKind::TaskComplete => "task.complete",
            MessageKind::TaskFail => "task.fail",
            MessageKind::MessageDirect => "message.direct",
            MessageKind::MessageBroadcast => "message.broadcast",
        }
    }

    /// Task messages and direct messages must name a recipient.
    pub fn requires_recipient(&self) -> bool {
        matches!(
            self,
            MessageKind::TaskAssign
                | MessageKind::TaskUpdate
                | MessageKind::TaskComplete
                | MessageKind::TaskFail
                | MessageKind::MessageDirect
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
