//! Agent communication protocol for the hub.
//!
//! This module defines the wire format exchanged between agents:
//! - Message envelopes with sender, recipient and routing metadata
//! - Agent roles, statuses and the envelope type grammar
//! - Structural validation of envelopes and agent descriptors

pub mod envelope;
pub mod types;
pub mod validate;

pub use envelope::{Envelope, EnvelopeMetadata, Recipient, Sender};
pub use types::{AgentRole, AgentStatus, MessageKind};
pub use validate::{validate_agent, validate_envelope, ValidationResult};
