//! Bounded per-agent FIFO queues for pull delivery.
//!
//! Queue semantics:
//! - enqueue appends; a full queue drops its oldest entry first
//! - dequeue is destructive and returns the oldest entries
//! - entries whose envelope carries a TTL expire and are never handed out

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use crate::protocol::Envelope;

/// Default per-agent capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// An envelope waiting in an agent's queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedMessage {
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Internal delivery id
    #[serde(rename = "_queueId")]
    pub queue_id: String,
    #[serde(rename = "_enqueuedAt")]
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip)]
    expires_at: Option<Instant>,
}

impl QueuedMessage {
    fn new(envelope: Envelope) -> Self {
        let expires_at = envelope.ttl().map(|ttl| Instant::now() + ttl);
        Self {
            envelope,
            queue_id: format!("q-{}", ulid::Ulid::new()),
            enqueued_at: Utc::now(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// Per-agent message queues.
#[derive(Debug)]
pub struct MessageQueue {
    capacity: usize,
    queues: Mutex<HashMap<String, VecDeque<QueuedMessage>>>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message to an agent's queue, evicting the oldest entry if the
    /// queue is full.
    pub fn enqueue(&self, agent_id: &str, envelope: Envelope) -> QueuedMessage {
        let message = QueuedMessage::new(envelope);
        let mut queues = self.lock();
        let queue = queues.entry(agent_id.to_string()).or_default();

        while queue.len() >= self.capacity {
            if let Some(evicted) = queue.pop_front() {
                tracing::warn!(agent_id = %agent_id, message_id = %evicted.envelope.id, "Queue full, dropped oldest message");
            }
        }
        queue.push_back(message.clone());

        tracing::debug!(agent_id = %agent_id, message_id = %message.envelope.id, depth = queue.len(), "Enqueued message");
        message
    }

    /// Remove and return up to `limit` of the oldest live messages.
    pub fn dequeue(&self, agent_id: &str, limit: usize) -> Vec<QueuedMessage> {
        let mut queues = self.lock();
        let Some(queue) = queues.get_mut(agent_id) else {
            return Vec::new();
        };

        let mut taken = Vec::new();
        while taken.len() < limit {
            match queue.pop_front() {
                Some(message) if message.is_expired() => {
                    tracing::debug!(agent_id = %agent_id, message_id = %message.envelope.id, "Discarded expired message");
                }
                Some(message) => taken.push(message),
                None => break,
            }
        }

        if queue.is_empty() {
            queues.remove(agent_id);
        }
        taken
    }

    /// Non-destructive view of an agent's queue.
    pub fn get_all(&self, agent_id: &str) -> Vec<QueuedMessage> {
        self.lock()
            .get(agent_id)
            .map(|queue| queue.iter().filter(|m| !m.is_expired()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, agent_id: &str) -> usize {
        self.lock().get(agent_id).map_or(0, VecDeque::len)
    }

    /// Drop every message queued for an agent. Returns how many were removed.
    pub fn clear(&self, agent_id: &str) -> usize {
        self.lock().remove(agent_id).map_or(0, |queue| queue.len())
    }

    pub fn total_size(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    /// Remove expired messages from every queue.
    pub fn purge_expired(&self) -> usize {
        let mut queues = self.lock();
        let mut purged = 0;
        for queue in queues.values_mut() {
            let before = queue.len();
            queue.retain(|m| !m.is_expired());
            purged += before - queue.len();
        }
        queues.retain(|_, queue| !queue.is_empty());
        purged
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<QueuedMessage>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageKind, Sender};
    use serde_json::json;
    use std::time::Duration;

    fn message(n: usize) -> Envelope {
        Envelope::new(
            MessageKind::MessageDirect,
            Sender::new("sender", "developer"),
            json!({ "n": n }),
        )
        .to_agent("a")
    }

    fn payloads(messages: &[QueuedMessage]) -> Vec<usize> {
        messages
            .iter()
            .map(|m| m.envelope.payload["n"].as_u64().unwrap() as usize)
            .collect()
    }

    #[test]
    fn test_fifo_dequeue() {
        let queue = MessageQueue::default();
        for n in 0..5 {
            queue.enqueue("a", message(n));
        }

        assert_eq!(payloads(&queue.dequeue("a", 2)), vec![0, 1]);
        assert_eq!(payloads(&queue.get_all("a")), vec![2, 3, 4]);
        assert_eq!(payloads(&queue.dequeue("a", 10)), vec![2, 3, 4]);
        assert!(queue.dequeue("a", 10).is_empty());
        assert_eq!(queue.total_size(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = MessageQueue::new(3);
        for n in 0..5 {
            queue.enqueue("a", message(n));
            assert!(queue.len("a") <= 3);
        }
        assert_eq!(payloads(&queue.get_all("a")), vec![2, 3, 4]);
    }

    #[test]
    fn test_queues_are_per_agent() {
        let queue = MessageQueue::default();
        queue.enqueue("a", message(1));
        queue.enqueue("b", message(2));
        queue.enqueue("b", message(3));

        assert_eq!(queue.len("a"), 1);
        assert_eq!(queue.len("b"), 2);
        assert_eq!(queue.total_size(), 3);
        assert_eq!(queue.clear("b"), 2);
        assert_eq!(queue.total_size(), 1);
    }

    #[test]
    fn test_queued_message_serializes_envelope_inline() {
        let queue = MessageQueue::default();
        let queued = queue.enqueue("a", message(7));
        let value = serde_json::to_value(&queued).unwrap();

        assert_eq!(value["type"], "message.direct");
        assert_eq!(value["payload"]["n"], 7);
        assert!(value["_queueId"].as_str().unwrap().starts_with("q-"));
        assert!(value.get("_enqueuedAt").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_messages_are_not_delivered() {
        let queue = MessageQueue::default();
        queue.enqueue("a", message(1).with_ttl(10));
        queue.enqueue("a", message(2));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(payloads(&queue.get_all("a")), vec![2]);
        assert_eq!(payloads(&queue.dequeue("a", 1)), vec![2]);
        assert_eq!(queue.total_size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let queue = MessageQueue::default();
        queue.enqueue("a", message(1).with_ttl(5));
        queue.enqueue("b", message(2).with_ttl(60));

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(queue.purge_expired(), 1);
        assert_eq!(queue.len("a"), 0);
        assert_eq!(queue.len("b"), 1);
    }
}
