//! Events submitted into the pipeline by external collaborators.
//!
//! An event is immutable once built. The same logical event may be
//! delivered more than once, so everything downstream keys off data that
//! is stable across deliveries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known field names carried in [`Event::data`].
pub mod fields {
    pub const RECORD_ID: &str = "recordId";
    pub const OWNER_ID: &str = "ownerId";
    pub const LOOKUP_ID: &str = "lookupId";
    pub const PROMPT: &str = "prompt";
    pub const TEXT: &str = "text";
    pub const MODEL: &str = "model";

    /// Caller-supplied deduplication token; overrides the workflow's
    /// identity fields when present.
    pub const IDEMPOTENCY_KEY: &str = "idempotencyKey";
}

/// Names of the workflow triggers the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    /// Enrich a property record from external providers
    EnrichRecord,

    /// Count one enrichment against an owner
    RecordUsageIncrement,

    /// Append a generated text entry to a record
    AddGeneration,

    /// Count one content generation against an owner
    GenerationUsageIncrement,

    /// Claim a record for its owner
    ClaimRecord,
}

impl EventName {
    pub const ALL: [EventName; 5] = [
        EventName::EnrichRecord,
        EventName::RecordUsageIncrement,
        EventName::AddGeneration,
        EventName::GenerationUsageIncrement,
        EventName::ClaimRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnrichRecord => "enrich-record",
            Self::RecordUsageIncrement => "record-usage-increment",
            Self::AddGeneration => "add-generation",
            Self::GenerationUsageIncrement => "generation-usage-increment",
            Self::ClaimRecord => "claim-record",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownEvent(s.to_string()))
    }
}

/// Rejection of a malformed or unroutable event, raised before any run exists
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unknown event name: {0}")]
    UnknownEvent(String),

    #[error("No workflow registered for event '{0}'")]
    Unregistered(EventName),

    #[error("Event '{event}' is missing required field '{field}'")]
    MissingField { event: EventName, field: String },

    #[error("Event data must be a JSON object: {0}")]
    MalformedData(String),
}

/// A message that triggers one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Which workflow this event triggers
    pub name: EventName,

    /// Named fields consumed by the workflow's steps
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    /// Create an event with no data
    pub fn new(name: EventName) -> Self {
        Self {
            name,
            data: Map::new(),
        }
    }

    /// Build an event from a name and a raw JSON payload
    pub fn from_json(name: EventName, payload: &str) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| ValidationError::MalformedData(e.to_string()))?;

        match value {
            Value::Object(data) => Ok(Self { name, data }),
            Value::Null => Ok(Self::new(name)),
            other => Err(ValidationError::MalformedData(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    /// Set a data field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Read a field as a non-empty string (numbers are rendered as text)
    pub fn field(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Read a field that the workflow cannot run without
    pub fn require(&self, key: &str) -> Result<String, ValidationError> {
        self.field(key).ok_or_else(|| ValidationError::MissingField {
            event: self.name,
            field: key.to_string(),
        })
    }

    /// Caller-supplied deduplication token, if any
    pub fn idempotency_key(&self) -> Option<String> {
        self.field(fields::IDEMPOTENCY_KEY)
    }
}
