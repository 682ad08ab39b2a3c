//! Structural validation of inbound envelopes and agent descriptors.
//!
//! Validation works on raw JSON so that every problem can be reported at once
//! as a field-level list, before anything is deserialized or mutated.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use super::types::{AgentRole, AgentStatus, NAMESPACES};
use crate::error::{Error, FieldError, Result};

static TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^({})\.[a-z][a-z0-9_]*$", NAMESPACES.join("|")))
        .expect("type grammar regex is valid")
});

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("semver regex is valid"));

const REQUIRED_ENVELOPE_FIELDS: [&str; 6] = ["id", "type", "version", "timestamp", "sender", "payload"];

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Convert into `Err(Error::Validation)` when invalid.
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(Error::Validation(self.errors))
        }
    }
}

/// Validate the shape of an envelope.
pub fn validate_envelope(raw: &Value) -> ValidationResult {
    let Some(obj) = raw.as_object() else {
        return ValidationResult::from_errors(vec![FieldError::new(
            "envelope",
            "must be a JSON object",
        )]);
    };

    let mut errors = Vec::new();

    for field in REQUIRED_ENVELOPE_FIELDS {
        if !obj.contains_key(field) {
            errors.push(FieldError::new(field, "is required"));
        }
    }

    if let Some(id) = obj.get("id") {
        require_non_empty_string(id, "id", &mut errors);
    }

    if let Some(kind) = obj.get("type") {
        match kind.as_str() {
            Some(kind) if TYPE_RE.is_match(kind) => {}
            _ => errors.push(FieldError::new(
                "type",
                format!("must match <namespace>.<verb> with namespace in {{{}}}", NAMESPACES.join(", ")),
            )),
        }
    }

    if let Some(version) = obj.get("version") {
        match version.as_str() {
            Some(version) if VERSION_RE.is_match(version) => {}
            _ => errors.push(FieldError::new("version", "must be a semantic version x.y.z")),
        }
    }

    if let Some(timestamp) = obj.get("timestamp") {
        require_non_empty_string(timestamp, "timestamp", &mut errors);
    }

    if let Some(sender) = obj.get("sender") {
        match sender.as_object() {
            Some(sender) => {
                for field in ["id", "role"] {
                    match sender.get(field) {
                        Some(value) => {
                            require_non_empty_string(value, &format!("sender.{}", field), &mut errors)
                        }
                        None => errors.push(FieldError::new(format!("sender.{}", field), "is required")),
                    }
                }
            }
            None => errors.push(FieldError::new("sender", "must be an object with id and role")),
        }
    }

    match obj.get("recipient") {
        None | Some(Value::Null) => {}
        Some(Value::Object(recipient)) => validate_recipient(recipient, &mut errors),
        Some(_) => errors.push(FieldError::new("recipient", "must be an object")),
    }

    match obj.get("metadata") {
        None | Some(Value::Null) => {}
        Some(Value::Object(metadata)) => validate_metadata(metadata, &mut errors),
        Some(_) => errors.push(FieldError::new("metadata", "must be an object")),
    }

    ValidationResult::from_errors(errors)
}

fn validate_recipient(recipient: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    match recipient.get("type") {
        Some(Value::String(kind)) if kind == "role" => match recipient.get("target") {
            Some(target) => require_non_empty_string(target, "recipient.target", errors),
            None => errors.push(FieldError::new("recipient.target", "is required for role recipients")),
        },
        Some(_) => errors.push(FieldError::new("recipient.type", "must be \"role\" when present")),
        None => match recipient.get("id") {
            Some(id) => require_non_empty_string(id, "recipient.id", errors),
            None => errors.push(FieldError::new(
                "recipient",
                "must carry an id or {type: \"role\", target}",
            )),
        },
    }
}

fn validate_metadata(metadata: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    for field in ["turn", "ttl"] {
        if let Some(value) = metadata.get(field) {
            if !value.is_null() && value.as_u64().is_none() {
                errors.push(FieldError::new(
                    format!("metadata.{}", field),
                    "must be a non-negative integer",
                ));
            }
        }
    }
    if let Some(value) = metadata.get("correlationId") {
        if !value.is_null() && !value.is_string() {
            errors.push(FieldError::new("metadata.correlationId", "must be a string"));
        }
    }
}

/// Validate an agent descriptor submitted for registration.
pub fn validate_agent(raw: &Value) -> ValidationResult {
    let Some(obj) = raw.as_object() else {
        return ValidationResult::from_errors(vec![FieldError::new("agent", "must be a JSON object")]);
    };

    let mut errors = Vec::new();

    match obj.get("id") {
        Some(id) => require_non_empty_string(id, "agent.id", &mut errors),
        None => errors.push(FieldError::new("agent.id", "is required")),
    }

    match obj.get("role") {
        Some(Value::String(role)) if role.parse::<AgentRole>().is_ok() => {}
        Some(_) => errors.push(FieldError::new(
            "agent.role",
            format!(
                "must be one of {}",
                AgentRole::ALL.map(|r| r.as_str()).join(", ")
            ),
        )),
        None => errors.push(FieldError::new("agent.role", "is required")),
    }

    match obj.get("callbackUrl") {
        None | Some(Value::Null) => {}
        Some(Value::String(url)) => {
            let parsed = reqwest::Url::parse(url);
            if !matches!(parsed, Ok(ref u) if u.scheme() == "http" || u.scheme() == "https") {
                errors.push(FieldError::new("agent.callbackUrl", "must be an http(s) URL"));
            }
        }
        Some(_) => errors.push(FieldError::new("agent.callbackUrl", "must be a string")),
    }

    match obj.get("status") {
        None | Some(Value::Null) => {}
        Some(Value::String(status)) if status.parse::<AgentStatus>().is_ok() => {}
        Some(_) => errors.push(FieldError::new(
            "agent.status",
            "must be one of idle, busy, online, offline",
        )),
    }

    match obj.get("capabilities") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
        Some(_) => errors.push(FieldError::new("agent.capabilities", "must be an array of strings")),
    }

    match obj.get("metadata") {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => errors.push(FieldError::new("agent.metadata", "must be an object")),
    }

    ValidationResult::from_errors(errors)
}

fn require_non_empty_string(value: &Value, field: &str, errors: &mut Vec<FieldError>) {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => {}
        _ => errors.push(FieldError::new(field, "must be a non-empty string")),
    }
}
