//! Role-based send permissions.
//!
//! Enforcement is opt-in. When enabled, the hub checks every submitted
//! envelope against the sender's registered role before it is stored or
//! routed.

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::{AgentRole, Envelope, MessageKind};

/// An action an agent role may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    MessageSend,
    MessageReceive,
    MessageBroadcast,
    TaskAssign,
    TaskUpdate,
    TaskComplete,
    TaskReview,
    TaskTest,
    AgentManage,
    SystemConfig,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::MessageSend => "message.send",
            Permission::MessageReceive => "message.receive",
            Permission::MessageBroadcast => "message.broadcast",
            Permission::TaskAssign => "task.assign",
            Permission::TaskUpdate => "task.update",
            Permission::TaskComplete => "task.complete",
            Permission::TaskReview => "task.review",
            Permission::TaskTest => "task.test",
            Permission::AgentManage => "agent.manage",
            Permission::SystemConfig => "system.config",
        }
    }

    /// Permission needed to send an envelope of the given type.
    pub fn required_for(kind: Option<MessageKind>) -> Self {
        match kind {
            Some(MessageKind::TaskAssign) => Permission::TaskAssign,
            Some(MessageKind::TaskUpdate) => Permission::TaskUpdate,
            Some(MessageKind::MessageBroadcast) => Permission::MessageBroadcast,
            _ => Permission::MessageSend,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Seniority of a role. Agents may address peers at or below their level.
pub fn level(role: AgentRole) -> u8 {
    match role {
        AgentRole::Manager => 4,
        AgentRole::Coordinator => 3,
        AgentRole::Developer | AgentRole::Reviewer | AgentRole::Tester => 2,
    }
}

pub fn permissions(role: AgentRole) -> &'static [Permission] {
    use Permission::*;
    match role {
        AgentRole::Manager => &[
            MessageSend,
            MessageReceive,
            MessageBroadcast,
            TaskAssign,
            TaskUpdate,
            TaskComplete,
            AgentManage,
            SystemConfig,
        ],
        AgentRole::Coordinator => &[
            MessageSend,
            MessageReceive,
            MessageBroadcast,
            TaskAssign,
            TaskUpdate,
            TaskComplete,
        ],
        AgentRole::Developer => &[MessageSend, MessageReceive, TaskUpdate, TaskComplete],
        AgentRole::Reviewer => &[MessageSend, MessageReceive, TaskReview, TaskUpdate],
        AgentRole::Tester => &[MessageSend, MessageReceive, TaskTest, TaskUpdate],
    }
}

pub fn has_permission(role: AgentRole, permission: Permission) -> bool {
    permissions(role).contains(&permission)
}

/// Sender-role policy applied to submitted envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionPolicy {
    enforce: bool,
}

impl PermissionPolicy {
    pub fn new(enforce: bool) -> Self {
        Self { enforce }
    }

    pub fn is_enforced(&self) -> bool {
        self.enforce
    }

    /// Check an envelope. `sender_role` and `recipient_role` are the
    /// registered roles of the sending agent and of a direct recipient.
    /// The role an envelope declares for its sender is never trusted.
    ///
    /// Unregistered agents on either side are treated as `developer`.
    pub fn check(
        &self,
        envelope: &Envelope,
        sender_role: Option<AgentRole>,
        recipient_role: Option<AgentRole>,
    ) -> Result<()> {
        if !self.enforce {
            return Ok(());
        }

        let sender_role = sender_role.unwrap_or(AgentRole::Developer);
        let needed = Permission::required_for(envelope.message_kind());
        if !has_permission(sender_role, needed) {
            return Err(Error::Forbidden(format!(
                "role '{}' lacks permission '{}'",
                sender_role, needed
            )));
        }

        if envelope.recipient_id().is_some() && !has_permission(sender_role, Permission::AgentManage) {
            let target = recipient_role.unwrap_or(AgentRole::Developer);
            if level(sender_role) < level(target) {
                return Err(Error::Forbidden(format!(
                    "role '{}' cannot address a '{}'",
                    sender_role, target
                )));
            }
        }

        Ok(())
    }
}
