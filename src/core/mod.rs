//! Core module - Registry, queueing, persistence and delivery.
//!
//! This module contains the heart of the hub's broker logic:
//! - Agent registry with liveness tracking
//! - Bounded per-agent pull queues
//! - File-backed message history
//! - Webhook dispatch with retries, and type-based routing

pub mod dispatcher;
pub mod permissions;
pub mod queue;
pub mod registry;
pub mod router;
pub mod store;

pub use dispatcher::{CallbackDispatcher, CallbackTransport, DeliveryReport, HttpTransport, RetryPolicy};
pub use permissions::PermissionPolicy;
pub use queue::{MessageQueue, QueuedMessage};
pub use registry::{Agent, AgentDescriptor, AgentRegistry};
pub use router::{MessageRouter, RouteOutcome};
pub use store::{MessageStore, StoreStats, StoredRecord};
