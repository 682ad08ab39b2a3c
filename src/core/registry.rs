//! Agent registry: identity, role index and liveness bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::protocol::{AgentRole, AgentStatus};

/// Registration request body for an agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub id: String,
    pub role: AgentRole,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            role,
            name: None,
            callback_url: None,
            status: None,
            capabilities: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

/// A registered agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub role: AgentRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub callback_url: Option<String>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    /// Wall-clock mirror of `last_heartbeat`, for display.
    pub last_seen: DateTime<Utc>,
    /// Monotonic liveness clock used by timeout sweeps.
    #[serde(skip)]
    pub last_heartbeat: Instant,
    /// Task the agent last reported working on.
    pub current_task: Option<String>,
    pub capabilities: BTreeSet<String>,
    pub metadata: Map<String, Value>,
}

impl Agent {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn is_offline(&self) -> bool {
        self.status == AgentStatus::Offline
    }

    /// Callback URL usable for push delivery right now.
    pub fn push_target(&self) -> Option<&str> {
        if self.is_offline() {
            return None;
        }
        self.callback_url.as_deref()
    }

    fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
        self.last_seen = Utc::now();
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    agents: HashMap<String, Agent>,
    by_role: HashMap<AgentRole, BTreeSet<String>>,
}

/// Registry of live agents, indexed by id and by role.
///
/// The primary map and the role index sit behind one lock, so a
/// re-registration under a new role moves the index entry atomically.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) an agent and return the stored record.
    pub fn register(&self, descriptor: AgentDescriptor) -> Agent {
        let now = Utc::now();
        let agent = Agent {
            id: descriptor.id,
            role: descriptor.role,
            name: descriptor.name,
            callback_url: descriptor.callback_url,
            status: descriptor.status.unwrap_or_default(),
            registered_at: now,
            last_seen: now,
            last_heartbeat: Instant::now(),
            current_task: None,
            capabilities: descriptor.capabilities.into_iter().collect(),
            metadata: descriptor.metadata,
        };

        let mut state = self.write();
        if let Some(previous) = state.agents.get(&agent.id).map(|a| a.role) {
            if previous != agent.role {
                remove_from_index(&mut state.by_role, previous, &agent.id);
                tracing::debug!(agent_id = %agent.id, from = %previous, to = %agent.role, "Agent changed role");
            }
        }
        state
            .by_role
            .entry(agent.role)
            .or_default()
            .insert(agent.id.clone());
        state.agents.insert(agent.id.clone(), agent.clone());

        tracing::info!(agent_id = %agent.id, role = %agent.role, callback = agent.callback_url.is_some(), "Agent registered");
        agent
    }

    /// Remove an agent. Returns false if it was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        let mut state = self.write();
        match state.agents.remove(id) {
            Some(agent) => {
                remove_from_index(&mut state.by_role, agent.role, id);
                tracing::info!(agent_id = %id, "Agent unregistered");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Agent> {
        self.read().agents.get(id).cloned()
    }

    /// All agents, oldest registration first.
    pub fn get_all(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.read().agents.values().cloned().collect();
        agents.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.id.cmp(&b.id)));
        agents
    }

    pub fn get_by_role(&self, role: AgentRole) -> Vec<Agent> {
        let state = self.read();
        state
            .by_role
            .get(&role)
            .map(|ids| ids.iter().filter_map(|id| state.agents.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Record a heartbeat. An offline agent comes back `online`.
    pub fn update_heartbeat(&self, id: &str) -> Option<Agent> {
        let mut state = self.write();
        let agent = state.agents.get_mut(id)?;
        agent.touch();
        if agent.status == AgentStatus::Offline {
            agent.status = AgentStatus::Online;
            tracing::info!(agent_id = %id, "Agent back online");
        }
        Some(agent.clone())
    }

    pub fn update_status(&self, id: &str, status: AgentStatus) -> Option<Agent> {
        let mut state = self.write();
        let agent = state.agents.get_mut(id)?;
        agent.status = status;
        Some(agent.clone())
    }

    /// Set or clear the task an agent reports working on.
    pub fn update_current_task(&self, id: &str, task: Option<String>) -> Option<Agent> {
        let mut state = self.write();
        let agent = state.agents.get_mut(id)?;
        agent.current_task = task;
        Some(agent.clone())
    }

    /// Mark every agent silent for longer than `timeout` as offline.
    ///
    /// Returns only the agents that transitioned in this call; agents that
    /// are already offline are not reported again.
    pub fn check_timeouts(&self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut state = self.write();
        let mut timed_out: Vec<String> = state
            .agents
            .values_mut()
            .filter(|agent| {
                agent.status != AgentStatus::Offline
                    && now.saturating_duration_since(agent.last_heartbeat) > timeout
            })
            .map(|agent| {
                agent.status = AgentStatus::Offline;
                agent.id.clone()
            })
            .collect();
        timed_out.sort();
        timed_out
    }

    pub fn len(&self) -> usize {
        self.read().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_from_index(index: &mut HashMap<AgentRole, BTreeSet<String>>, role: AgentRole, id: &str) {
    if let Some(ids) = index.get_mut(&role) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(&role);
        }
    }
}
