//! The hub context: owns every broker component and implements the
//! operations exposed over HTTP.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::config::HubConfig;
use crate::core::dispatcher::{CallbackDispatcher, CallbackTransport, DeliveryReport, HttpTransport};
use crate::core::permissions::PermissionPolicy;
use crate::core::queue::{MessageQueue, QueuedMessage};
use crate::core::registry::{Agent, AgentDescriptor, AgentRegistry};
use crate::core::router::{MessageRouter, RouteOutcome};
use crate::core::store::{MessageStore, StoreStats, StoredRecord};
use crate::error::{Error, Result};
use crate::protocol::{
    validate_agent, validate_envelope, AgentRole, AgentStatus, Envelope, MessageKind, Sender,
};

/// Default page size for pull, history and search.
pub const DEFAULT_LIMIT: usize = 50;

/// Sender id of broadcasts the hub issues on its own behalf.
pub const HUB_SENDER_ID: &str = "hub";

/// Role of the hub identity, also stamped on broadcasts from unregistered
/// senders that declare no role.
const HUB_ROLE: AgentRole = AgentRole::Manager;

/// Settings handed to an agent at registration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub heartbeat_interval: u64,
    pub heartbeat_timeout: u64,
    pub message_timeout: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub agent_id: String,
    pub callback_enabled: bool,
    pub config: ClientConfig,
    #[serde(skip)]
    pub agent: Agent,
}

/// Body of `POST /broadcast`. The sender may be an id or `{id, role}`;
/// without one the hub broadcasts as itself to every live agent.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub sender: Option<Value>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOutcome {
    pub message_id: String,
    pub delivered: usize,
    pub results: Vec<DeliveryReport>,
}

/// Fields a heartbeat may update besides liveness.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatUpdate {
    pub status: Option<AgentStatus>,
    /// `Some(None)` clears the current task, `None` leaves it as is.
    pub current_task: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatOutcome {
    pub agent_id: String,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    pub messages: Vec<QueuedMessage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    /// Seconds since the hub started
    pub uptime: u64,
    pub agents: usize,
    pub messages: MessageCounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCounts {
    pub queued: usize,
    pub stored: usize,
}

/// Counts removed by one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub stored: usize,
    pub expired: usize,
}

/// Shared broker state.
pub struct Hub {
    config: HubConfig,
    registry: Arc<AgentRegistry>,
    queue: Arc<MessageQueue>,
    store: Arc<Mutex<MessageStore>>,
    dispatcher: CallbackDispatcher,
    router: MessageRouter,
    permissions: PermissionPolicy,
    started_at: Instant,
}

impl Hub {
    /// Build a hub that delivers callbacks over HTTP.
    pub fn new(config: HubConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.callback_timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a hub with a custom callback transport.
    pub fn with_transport(config: HubConfig, transport: Arc<dyn CallbackTransport>) -> Result<Self> {
        config.validate()?;

        let store = MessageStore::open(config.messages_dir()?)?;
        let registry = Arc::new(AgentRegistry::new());
        let queue = Arc::new(MessageQueue::new(config.queue_capacity));
        let dispatcher = CallbackDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            transport,
            config.retry_policy(),
        );
        let router = MessageRouter::new(Arc::clone(&registry), dispatcher.clone());

        Ok(Self {
            permissions: PermissionPolicy::new(config.enforce_permissions),
            config,
            registry,
            queue,
            store: Arc::new(Mutex::new(store)),
            dispatcher,
            router,
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Register an agent from the `agent` object of a registration body.
    pub fn register_agent(&self, raw: &Value) -> Result<Registration> {
        validate_agent(raw).into_result()?;

        let mut raw = raw.clone();
        if let Some(obj) = raw.as_object_mut() {
            obj.retain(|_, value| !value.is_null());
        }
        let descriptor: AgentDescriptor =
            serde_json::from_value(raw).map_err(|e| Error::invalid("agent", e.to_string()))?;

        let agent = self.registry.register(descriptor);
        Ok(Registration {
            agent_id: agent.id.clone(),
            callback_enabled: agent.callback_url.is_some(),
            config: ClientConfig {
                heartbeat_interval: self.config.heartbeat_interval_ms,
                heartbeat_timeout: self.config.heartbeat_timeout_ms,
                message_timeout: self.config.callback_timeout_ms,
            },
            agent,
        })
    }

    /// Admit, persist and route a posted envelope.
    pub async fn submit(&self, raw: Value) -> Result<RouteOutcome> {
        validate_envelope(&raw).into_result()?;
        let envelope: Envelope =
            serde_json::from_value(raw).map_err(|e| Error::invalid("envelope", e.to_string()))?;

        if let Some(turn) = envelope.turn() {
            if turn > self.config.max_turns {
                tracing::warn!(message_id = %envelope.id, sender = %envelope.sender.id, turn, "Loop detected, message rejected");
                return Err(Error::LoopDetected {
                    turn,
                    limit: self.config.max_turns,
                });
            }
        }

        let sender_role = self.registered_role(&envelope.sender.id);
        let recipient_role = envelope
            .recipient_id()
            .and_then(|id| self.registered_role(id));
        self.permissions.check(&envelope, sender_role, recipient_role)?;

        let store = Arc::clone(&self.store);
        let router = self.router.clone();
        self.dispatcher
            .spawn(async move {
                persist(store, &envelope).await;
                router.route(&envelope).await
            })
            .await
            .map_err(|e| Error::Other(format!("routing task failed: {}", e)))
    }

    /// Build and fan out a `message.broadcast`. An agent sender is excluded
    /// from the fan-out; the hub identity reaches every live agent.
    pub async fn broadcast(&self, request: BroadcastRequest) -> Result<BroadcastOutcome> {
        let (sender, sender_role, exclude) = match self.broadcast_sender(request.sender.as_ref())? {
            Some(sender) => {
                let role = self.registered_role(&sender.id);
                let exclude = sender.id.clone();
                (sender, role, Some(exclude))
            }
            None => (Sender::new(HUB_SENDER_ID, HUB_ROLE.to_string()), Some(HUB_ROLE), None),
        };

        let envelope = Envelope::new(
            MessageKind::MessageBroadcast,
            sender,
            json!({
                "subject": request.subject,
                "content": request.content.unwrap_or(Value::Null),
                "urgent": request.urgent,
            }),
        );
        self.permissions.check(&envelope, sender_role, None)?;

        let store = Arc::clone(&self.store);
        let dispatcher = self.dispatcher.clone();
        let message_id = envelope.id.clone();
        let results = self
            .dispatcher
            .spawn(async move {
                persist(store, &envelope).await;
                let results = dispatcher.push_broadcast(&envelope, exclude.as_deref()).await;
                tracing::info!(message_id = %envelope.id, sender = %envelope.sender.id, recipients = results.len(), "Broadcast sent");
                results
            })
            .await
            .map_err(|e| Error::Other(format!("broadcast task failed: {}", e)))?;

        Ok(BroadcastOutcome {
            message_id,
            delivered: results.len(),
            results,
        })
    }

    /// The agent sender named by a broadcast body, or `None` for the hub.
    fn broadcast_sender(&self, raw: Option<&Value>) -> Result<Option<Sender>> {
        let (id, role) = match raw {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(id)) if !id.trim().is_empty() => (id.clone(), None),
            Some(Value::Object(obj)) => match obj.get("id").and_then(Value::as_str) {
                Some(id) if !id.trim().is_empty() => (
                    id.to_string(),
                    obj.get("role").and_then(Value::as_str).map(str::to_string),
                ),
                _ => return Err(Error::invalid("sender.id", "is required")),
            },
            _ => return Err(Error::invalid("sender", "must be an agent id or {id, role}")),
        };

        let role = match self.registered_role(&id) {
            Some(registered) => registered.to_string(),
            None => role.unwrap_or_else(|| HUB_ROLE.to_string()),
        };
        Ok(Some(Sender::new(id, role)))
    }

    fn registered_role(&self, agent_id: &str) -> Option<AgentRole> {
        self.registry.get(agent_id).map(|agent| agent.role)
    }

    /// Record a heartbeat and drain the agent's queue.
    pub fn heartbeat(&self, agent_id: &str, update: HeartbeatUpdate) -> Result<HeartbeatOutcome> {
        let mut agent = self
            .registry
            .update_heartbeat(agent_id)
            .ok_or_else(|| Error::NotFound(format!("Agent not registered: {}", agent_id)))?;
        if let Some(status) = update.status {
            if let Some(updated) = self.registry.update_status(agent_id, status) {
                agent = updated;
            }
        }
        if let Some(task) = update.current_task {
            if let Some(updated) = self.registry.update_current_task(agent_id, task) {
                agent = updated;
            }
        }

        let messages = self.queue.dequeue(agent_id, self.queue.capacity());
        tracing::debug!(agent_id = %agent_id, status = %agent.status, drained = messages.len(), "Heartbeat");
        Ok(HeartbeatOutcome {
            agent_id: agent.id,
            status: agent.status,
            current_task: agent.current_task,
            messages,
        })
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.registry.get_all()
    }

    pub fn agent(&self, agent_id: &str) -> Result<Agent> {
        self.registry
            .get(agent_id)
            .ok_or_else(|| Error::NotFound(format!("Agent not registered: {}", agent_id)))
    }

    /// Remove an agent and cancel its pending retries. Queued messages stay.
    pub fn unregister(&self, agent_id: &str) -> Result<()> {
        if !self.registry.unregister(agent_id) {
            return Err(Error::NotFound(format!("Agent not registered: {}", agent_id)));
        }
        let cancelled = self.dispatcher.cancel_agent(agent_id);
        if cancelled > 0 {
            tracing::debug!(agent_id = %agent_id, cancelled, "Cancelled pending retries");
        }
        Ok(())
    }

    /// Destructive pull of queued messages.
    pub fn pull(&self, agent_id: &str, limit: Option<usize>) -> Vec<QueuedMessage> {
        self.queue.dequeue(agent_id, limit.unwrap_or(DEFAULT_LIMIT))
    }

    pub async fn history(&self, agent_id: Option<String>, limit: Option<usize>) -> Result<Vec<StoredRecord>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        self.with_store(move |store| store.get_all(agent_id.as_deref(), limit))
            .await
    }

    pub async fn search(&self, query: Option<String>, limit: Option<usize>) -> Result<Vec<StoredRecord>> {
        let query = match query {
            Some(q) if !q.trim().is_empty() => q,
            _ => return Err(Error::invalid("q", "is required")),
        };
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        self.with_store(move |store| store.search(&query, limit)).await
    }

    /// A single stored envelope by id.
    pub async fn stored(&self, id: &str) -> Result<StoredRecord> {
        let lookup = id.to_string();
        self.with_store(move |store| store.get(&lookup))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Message not found: {}", id)))
    }

    /// Flag a stored message as read and return the updated record.
    pub async fn mark_read(&self, id: &str) -> Result<StoredRecord> {
        let lookup = id.to_string();
        let record = self
            .with_store(move |store| {
                if store.mark_read(&lookup)? {
                    store.get(&lookup)
                } else {
                    Ok(None)
                }
            })
            .await?;
        record.ok_or_else(|| Error::NotFound(format!("Message not found: {}", id)))
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.with_store(|store| Ok(store.stats())).await
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let stored = self.with_store(|store| Ok(store.len())).await?;
        Ok(HealthReport {
            status: "ok",
            uptime: self.started_at.elapsed().as_secs(),
            agents: self.registry.len(),
            messages: MessageCounts {
                queued: self.queue.total_size(),
                stored,
            },
        })
    }

    /// Mark silent agents offline. Returns agents that transitioned now.
    pub fn sweep_heartbeats(&self) -> Vec<String> {
        let offline = self.registry.check_timeouts(self.config.heartbeat_timeout());
        for agent_id in &offline {
            tracing::warn!(agent_id = %agent_id, "Agent timed out, marked offline");
        }
        offline
    }

    /// Drop history past the retention window and expired queue entries.
    pub async fn sweep_retention(&self) -> Result<RetentionReport> {
        let days = self.config.retention_days;
        let stored = self.with_store(move |store| store.cleanup(days)).await?;
        let expired = self.queue.purge_expired();
        if stored > 0 || expired > 0 {
            tracing::info!(stored, expired, "Retention sweep");
        }
        Ok(RetentionReport { stored, expired })
    }

    /// Cancel outstanding retries and wait for them to finish.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut MessageStore) -> Result<T> + Send + 'static,
    {
        on_store(Arc::clone(&self.store), f).await
    }
}

/// Save before routing. A failed save is logged and routing continues.
async fn persist(store: Arc<Mutex<MessageStore>>, envelope: &Envelope) {
    let copy = envelope.clone();
    if let Err(e) = on_store(store, move |store| store.save(copy)).await {
        tracing::error!(message_id = %envelope.id, error = %e, "Failed to persist message");
    }
}

/// Run blocking store work off the async runtime.
async fn on_store<T, F>(store: Arc<Mutex<MessageStore>>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut MessageStore) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *store)
    })
    .await
    .map_err(|e| Error::Store(format!("store task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Unreachable;

    #[async_trait]
    impl CallbackTransport for Unreachable {
        async fn deliver(&self, _url: &str, _envelope: &Envelope) -> Result<()> {
            Err(Error::Delivery("connection refused".to_string()))
        }
    }

    fn hub_in(dir: &tempfile::TempDir, config: HubConfig) -> Hub {
        let config = HubConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..config
        };
        Hub::with_transport(config, Arc::new(Unreachable)).unwrap()
    }

    fn direct(to: &str) -> Value {
        let envelope = Envelope::new(
            MessageKind::MessageDirect,
            Sender::new("boss", "manager"),
            json!({"content": "hello"}),
        )
        .to_agent(to);
        serde_json::to_value(envelope).unwrap()
    }

    #[test]
    fn test_register_contract() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());

        let registration = hub
            .register_agent(&json!({"id": "dev", "role": "developer", "callbackUrl": null, "metadata": null}))
            .unwrap();

        assert_eq!(registration.agent_id, "dev");
        assert!(!registration.callback_enabled);
        assert_eq!(registration.config.heartbeat_interval, 30_000);
        assert_eq!(registration.config.heartbeat_timeout, 90_000);
        assert_eq!(registration.config.message_timeout, 10_000);
    }

    #[test]
    fn test_register_rejects_unknown_role() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());

        let err = hub.register_agent(&json!({"id": "x", "role": "janitor"})).unwrap_err();
        assert!(matches!(err, Error::Validation(ref errors) if errors[0].field == "agent.role"));
    }

    #[tokio::test]
    async fn test_submit_persists_then_routes() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());

        let outcome = hub.submit(direct("dev")).await.unwrap();

        assert_eq!(outcome.queued, Some(true));
        assert_eq!(hub.queue().len("dev"), 1);
        assert_eq!(hub.history(Some("dev".to_string()), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_loop_breaker_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());

        let mut at_limit = direct("dev");
        at_limit["metadata"] = json!({"turn": 20});
        assert!(hub.submit(at_limit).await.is_ok());

        let mut over = direct("dev");
        over["metadata"] = json!({"turn": 21});
        let err = hub.submit(over).await.unwrap_err();
        assert!(matches!(err, Error::LoopDetected { turn: 21, limit: 20 }));

        // rejected envelopes are neither stored nor queued
        assert_eq!(hub.queue().len("dev"), 1);
        assert_eq!(hub.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_permission_enforcement() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(
            &dir,
            HubConfig {
                enforce_permissions: true,
                ..HubConfig::default()
            },
        );

        let mut assign = direct("dev");
        assign["type"] = json!("task.assign");
        assign["sender"] = json!({"id": "t1", "role": "tester"});

        let err = hub.submit(assign).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert_eq!(hub.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());
        hub.register_agent(&json!({"id": "dev", "role": "developer"})).unwrap();
        hub.submit(direct("dev")).await.unwrap();

        let busy = HeartbeatUpdate {
            status: Some(AgentStatus::Busy),
            ..HeartbeatUpdate::default()
        };
        let beat = hub.heartbeat("dev", busy).unwrap();
        assert_eq!(beat.status, AgentStatus::Busy);
        assert_eq!(beat.messages.len(), 1);
        assert!(hub.heartbeat("dev", HeartbeatUpdate::default()).unwrap().messages.is_empty());

        assert!(matches!(
            hub.heartbeat("ghost", HeartbeatUpdate::default()),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_request() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());
        for id in ["a", "b", "c"] {
            hub.register_agent(&json!({"id": id, "role": "developer"})).unwrap();
        }

        let outcome = hub
            .broadcast(BroadcastRequest {
                sender: Some(json!("a")),
                subject: Some("standup".to_string()),
                content: Some(json!("in 5")),
                urgent: false,
            })
            .await
            .unwrap();

        assert_eq!(outcome.delivered, 2);
        assert_eq!(hub.queue().len("a"), 0);
        let queued = hub.pull("b", None);
        assert_eq!(queued[0].envelope.sender.role, "developer");
        assert_eq!(queued[0].envelope.payload["subject"], "standup");
    }

    #[tokio::test]
    async fn test_broadcast_without_sender_reaches_everyone() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());
        for id in ["a", "b", "c"] {
            hub.register_agent(&json!({"id": id, "role": "developer"})).unwrap();
        }

        let outcome = hub
            .broadcast(BroadcastRequest {
                sender: None,
                subject: Some("x".to_string()),
                content: None,
                urgent: false,
            })
            .await
            .unwrap();

        assert_eq!(outcome.delivered, 3);
        for id in ["a", "b", "c"] {
            let queued = hub.pull(id, None);
            assert_eq!(queued.len(), 1);
            assert_eq!(queued[0].envelope.sender.id, HUB_SENDER_ID);
            assert!(queued[0].envelope.payload["content"].is_null());
        }
    }

    #[tokio::test]
    async fn test_broadcast_rejects_malformed_sender() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());
        let err = hub
            .broadcast(BroadcastRequest {
                sender: Some(json!({"role": "manager"})),
                subject: None,
                content: Some(json!("hi")),
                urgent: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref errors) if errors[0].field == "sender.id"));
    }

    #[tokio::test]
    async fn test_declared_role_cannot_bypass_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(
            &dir,
            HubConfig {
                enforce_permissions: true,
                ..HubConfig::default()
            },
        );
        hub.register_agent(&json!({"id": "t1", "role": "tester"})).unwrap();
        hub.register_agent(&json!({"id": "dev", "role": "developer"})).unwrap();

        let mut assign = direct("dev");
        assign["type"] = json!("task.assign");
        assign["sender"] = json!({"id": "t1", "role": "manager"});
        let err = hub.submit(assign).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let err = hub
            .broadcast(BroadcastRequest {
                sender: Some(json!({"id": "t1", "role": "manager"})),
                subject: None,
                content: Some(json!("all hands")),
                urgent: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert_eq!(hub.queue().len("dev"), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_tracks_current_task() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());
        hub.register_agent(&json!({"id": "dev", "role": "developer"})).unwrap();

        let working = HeartbeatUpdate {
            current_task: Some(Some("task-42".to_string())),
            ..HeartbeatUpdate::default()
        };
        assert_eq!(
            hub.heartbeat("dev", working).unwrap().current_task.as_deref(),
            Some("task-42")
        );

        // an absent field leaves the task alone
        hub.heartbeat("dev", HeartbeatUpdate::default()).unwrap();
        assert_eq!(hub.agent("dev").unwrap().current_task.as_deref(), Some("task-42"));

        let done = HeartbeatUpdate {
            current_task: Some(None),
            ..HeartbeatUpdate::default()
        };
        assert!(hub.heartbeat("dev", done).unwrap().current_task.is_none());
    }

    #[tokio::test]
    async fn test_mark_read() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());
        let envelope = direct("dev");
        let id = envelope["id"].as_str().unwrap().to_string();
        hub.submit(envelope).await.unwrap();

        assert!(!hub.stored(&id).await.unwrap().read);
        assert!(hub.mark_read(&id).await.unwrap().read);
        assert!(hub.stored(&id).await.unwrap().read);
        assert!(matches!(hub.mark_read("nope").await, Err(Error::NotFound(_))));
    }

    struct SlowFailure;

    #[async_trait]
    impl CallbackTransport for SlowFailure {
        async fn deliver(&self, _url: &str, _envelope: &Envelope) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Err(Error::Delivery("Callback timeout".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dropped_request_still_queues_message() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..HubConfig::default()
        };
        let hub = Hub::with_transport(config, Arc::new(SlowFailure)).unwrap();
        hub.register_agent(&json!({"id": "dev", "role": "developer", "callbackUrl": "http://dev.local/cb"}))
            .unwrap();

        // the caller gives up while the callback is in flight
        let cancelled = tokio::time::timeout(Duration::from_millis(50), hub.submit(direct("dev"))).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(hub.queue().len("dev"), 1);
        assert_eq!(hub.stats().await.unwrap().total, 1);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregister_keeps_queue() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());
        hub.register_agent(&json!({"id": "dev", "role": "developer"})).unwrap();
        hub.submit(direct("dev")).await.unwrap();

        hub.unregister("dev").unwrap();
        assert!(matches!(hub.unregister("dev"), Err(Error::NotFound(_))));
        assert!(matches!(hub.agent("dev"), Err(Error::NotFound(_))));
        assert_eq!(hub.pull("dev", None).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sweep_then_push_queues() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());
        hub.register_agent(&json!({"id": "dev", "role": "developer", "callbackUrl": "http://dev.local/cb"}))
            .unwrap();

        tokio::time::advance(Duration::from_secs(91)).await;
        assert_eq!(hub.sweep_heartbeats(), vec!["dev".to_string()]);
        assert!(hub.sweep_heartbeats().is_empty());

        let outcome = hub.submit(direct("dev")).await.unwrap();
        assert_eq!(outcome.reason.as_deref(), Some("agent_offline"));
        assert_eq!(hub.queue().len("dev"), 1);
    }

    #[tokio::test]
    async fn test_retention_sweep_with_zero_days() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(
            &dir,
            HubConfig {
                retention_days: 0,
                ..HubConfig::default()
            },
        );
        hub.submit(direct("dev")).await.unwrap();

        let report = hub.sweep_retention().await.unwrap();
        assert_eq!(report.stored, 1);
        assert_eq!(hub.health().await.unwrap().messages.stored, 0);
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub_in(&dir, HubConfig::default());
        assert!(matches!(hub.search(None, None).await, Err(Error::Validation(_))));
        assert!(matches!(hub.stored("nope").await, Err(Error::NotFound(_))));
    }
}
