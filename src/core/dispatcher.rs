//! Webhook push delivery with retry/backoff and pull-queue fallback.

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::queue::MessageQueue;
use super::registry::AgentRegistry;
use crate::error::{Error, Result};
use crate::protocol::Envelope;

/// Header marking requests that originate from the hub.
pub const HUB_HEADER: &str = "X-Pheromone-Hub";

/// Transport used to POST an envelope to an agent's callback URL.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// Deliver the envelope. Any non-2xx answer or timeout is an error.
    async fn deliver(&self, url: &str, envelope: &Envelope) -> Result<()>;
}

/// reqwest-backed webhook transport.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackTransport for HttpTransport {
    async fn deliver(&self, url: &str, envelope: &Envelope) -> Result<()> {
        let response = self
            .client
            .post(url)
            .header(HUB_HEADER, "true")
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Delivery("Callback timeout".to_string())
                } else {
                    Error::Delivery(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Delivery(format!("HTTP {}: {}", status.as_u16(), body)))
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_retries: 3,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (0-indexed): `base * 2^attempt` plus up to
    /// 25% jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = exponential.mul_f64(rand::thread_rng().gen_range(0.0..=0.25));
        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

/// Outcome of one push attempt for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub agent_id: String,
    pub delivered: bool,
    pub queued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeliveryReport {
    fn delivered(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            delivered: true,
            queued: false,
            reason: None,
        }
    }

    fn queued(agent_id: &str, reason: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            delivered: false,
            queued: true,
            reason: Some(reason.into()),
        }
    }
}

/// Identity of a scheduled retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub agent_id: String,
    pub message_id: String,
    pub attempt: u32,
}

/// Pushes envelopes to agent callbacks, falling back to the pull queue.
///
/// A failed push leaves the envelope queued and schedules background
/// retries. Retries only ever give up on push; the queued copy stays
/// available for pull delivery.
#[derive(Clone)]
pub struct CallbackDispatcher {
    registry: Arc<AgentRegistry>,
    queue: Arc<MessageQueue>,
    transport: Arc<dyn CallbackTransport>,
    policy: RetryPolicy,
    retries: Arc<Mutex<HashMap<RetryKey, CancellationToken>>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl CallbackDispatcher {
    pub fn new(
        registry: Arc<AgentRegistry>,
        queue: Arc<MessageQueue>,
        transport: Arc<dyn CallbackTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            queue,
            transport,
            policy,
            retries: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Push one envelope to one agent.
    pub async fn push(&self, agent_id: &str, envelope: &Envelope) -> DeliveryReport {
        let agent = self.registry.get(agent_id);
        let url = match &agent {
            None => return self.fallback(agent_id, envelope, "unknown_agent"),
            Some(agent) if agent.callback_url.is_none() => {
                return self.fallback(agent_id, envelope, "no_callback_url")
            }
            Some(agent) if agent.is_offline() => {
                return self.fallback(agent_id, envelope, "agent_offline")
            }
            Some(agent) => agent.callback_url.clone().unwrap_or_default(),
        };

        match self.transport.deliver(&url, envelope).await {
            Ok(()) => {
                tracing::debug!(agent_id = %agent_id, message_id = %envelope.id, "Pushed message");
                DeliveryReport::delivered(agent_id)
            }
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, message_id = %envelope.id, error = %e, "Push failed, queued for retry");
                self.queue.enqueue(agent_id, envelope.clone());
                self.schedule_retry(agent_id.to_string(), Arc::new(envelope.clone()), 0);
                DeliveryReport::queued(agent_id, e.to_string())
            }
        }
    }

    /// Push to every non-offline agent except `exclude`.
    ///
    /// Targets are a snapshot of the registry taken at call time.
    pub async fn push_broadcast(&self, envelope: &Envelope, exclude: Option<&str>) -> Vec<DeliveryReport> {
        let targets: Vec<String> = self
            .registry
            .get_all()
            .into_iter()
            .filter(|agent| !agent.is_offline() && Some(agent.id.as_str()) != exclude)
            .map(|agent| agent.id)
            .collect();

        let envelope = Arc::new(envelope.clone());
        let mut pushes = JoinSet::new();
        for (position, agent_id) in targets.iter().cloned().enumerate() {
            let this = self.clone();
            let envelope = Arc::clone(&envelope);
            pushes.spawn(async move { (position, this.push(&agent_id, &envelope).await) });
        }

        let mut reports: Vec<Option<DeliveryReport>> = vec![None; targets.len()];
        while let Some(joined) = pushes.join_next().await {
            match joined {
                Ok((position, report)) => reports[position] = Some(report),
                Err(e) => tracing::error!(error = %e, "Broadcast push task failed"),
            }
        }

        reports
            .into_iter()
            .zip(targets)
            .map(|(report, agent_id)| {
                report.unwrap_or_else(|| self.fallback(&agent_id, &envelope, "push_task_failed"))
            })
            .collect()
    }

    /// Run delivery work on a task the dispatcher tracks. The work keeps
    /// going if the caller stops polling the handle, and `shutdown` waits
    /// for it.
    pub fn spawn<F>(&self, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(work)
    }

    /// Number of retries currently waiting or in flight.
    pub fn pending_retries(&self) -> usize {
        self.retries().len()
    }

    /// Cancel every pending retry for an agent. Queued copies are kept.
    pub fn cancel_agent(&self, agent_id: &str) -> usize {
        let mut retries = self.retries();
        let keys: Vec<RetryKey> = retries
            .keys()
            .filter(|key| key.agent_id == agent_id)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(token) = retries.remove(key) {
                token.cancel();
            }
        }
        keys.len()
    }

    /// Cancel all retries and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("Callback dispatcher drained");
    }

    fn fallback(&self, agent_id: &str, envelope: &Envelope, reason: &str) -> DeliveryReport {
        self.queue.enqueue(agent_id, envelope.clone());
        DeliveryReport::queued(agent_id, reason)
    }

    fn schedule_retry(&self, agent_id: String, envelope: Arc<Envelope>, attempt: u32) {
        if attempt >= self.policy.max_retries {
            tracing::warn!(agent_id = %agent_id, message_id = %envelope.id, "Max retries reached, message stays in queue");
            return;
        }
        if self.shutdown.is_cancelled() {
            return;
        }

        let key = RetryKey {
            agent_id,
            message_id: envelope.id.clone(),
            attempt,
        };
        let token = self.shutdown.child_token();
        self.retries().insert(key.clone(), token.clone());

        let delay = self.policy.delay_for(attempt);
        let this = self.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(agent_id = %key.agent_id, attempt = attempt + 1, "Retry cancelled");
                    this.retries().remove(&key);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let target = this
                .registry
                .get(&key.agent_id)
                .and_then(|agent| agent.push_target().map(str::to_string));
            let Some(url) = target else {
                tracing::debug!(agent_id = %key.agent_id, attempt = attempt + 1, "Retry dropped, agent unreachable");
                this.retries().remove(&key);
                return;
            };

            let outcome = tokio::select! {
                _ = token.cancelled() => None,
                outcome = this.transport.deliver(&url, &envelope) => Some(outcome),
            };
            this.retries().remove(&key);

            match outcome {
                Some(Ok(())) => {
                    tracing::info!(agent_id = %key.agent_id, attempt = attempt + 1, "Retry succeeded");
                }
                Some(Err(e)) => {
                    tracing::warn!(agent_id = %key.agent_id, attempt = attempt + 1, error = %e, "Retry failed");
                    this.schedule_retry(key.agent_id, envelope, attempt + 1);
                }
                None => {
                    tracing::debug!(agent_id = %key.agent_id, attempt = attempt + 1, "Retry cancelled in flight");
                }
            }
        });
    }

    fn retries(&self) -> MutexGuard<'_, HashMap<RetryKey, CancellationToken>> {
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
