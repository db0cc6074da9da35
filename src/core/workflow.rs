//! Workflow definitions and the event → workflow registry.
//!
//! A workflow is an ordered list of steps triggered by one event name. The
//! definition also says which event fields are required and which fields
//! identify the logical event, so that redeliveries map to the same run.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use super::step::Step;
use crate::domain::{fields, Event, EventName, ValidationError};

/// Ordered steps bound to one event name
pub struct WorkflowDefinition {
    event: EventName,
    required: Vec<String>,
    identity: Vec<String>,

    /// Field without which the event cannot be deduplicated
    subject: Option<String>,

    steps: Vec<Arc<dyn Step>>,
}

impl WorkflowDefinition {
    pub fn new(event: EventName) -> Self {
        Self {
            event,
            required: Vec::new(),
            identity: Vec::new(),
            subject: None,
            steps: Vec::new(),
        }
    }

    /// Fields that must be present for the event to be accepted
    pub fn require(mut self, fields: &[&str]) -> Self {
        self.required.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Fields whose values identify the logical event
    pub fn identity(mut self, fields: &[&str]) -> Self {
        self.identity.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Optional field that anchors deduplication. Events missing both this
    /// field and an idempotency key get a one-off run id.
    pub fn subject(mut self, field: &str) -> Self {
        self.subject = Some(field.to_string());
        self
    }

    pub fn step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn event(&self) -> EventName {
        self.event
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    /// Step names in execution order
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Check that an event carries every required field
    pub fn validate(&self, event: &Event) -> Result<(), ValidationError> {
        if event.name != self.event {
            return Err(ValidationError::Unregistered(event.name));
        }

        for field in &self.required {
            event.require(field)?;
        }

        Ok(())
    }

    /// Deterministic run identifier for an event.
    ///
    /// Two deliveries of the same logical event yield the same id.
    pub fn run_id(&self, event: &Event) -> String {
        let mut input = String::from(self.event.as_str());

        if let Some(key) = event.idempotency_key() {
            push_part(&mut input, fields::IDEMPOTENCY_KEY, &key);
        } else {
            let anchored = self
                .subject
                .as_deref()
                .map_or(true, |field| event.field(field).is_some());

            if !anchored {
                let nonce = Uuid::new_v4();
                warn!(
                    event = %self.event,
                    %nonce,
                    "Event carries no deduplication key; redeliveries will run again"
                );
                push_part(&mut input, "nonce", &nonce.to_string());
            }

            for field in &self.identity {
                push_part(&mut input, field, &event.field(field).unwrap_or_default());
            }
        }

        format!("{}:{}", self.event, hash_input(&input))
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("event", &self.event)
            .field("required", &self.required)
            .field("identity", &self.identity)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Append `name=<byte length>:value`; the length prefix keeps free-text
/// values from running into the next field.
fn push_part(input: &mut String, name: &str, value: &str) {
    input.push('\n');
    input.push_str(name);
    input.push('=');
    input.push_str(&value.len().to_string());
    input.push(':');
    input.push_str(value);
}

/// Hash input content (first 16 hex chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Event name → workflow definition
#[derive(Debug, Default)]
pub struct Registry {
    workflows: HashMap<EventName, Arc<WorkflowDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow, replacing any earlier one for the same event
    pub fn register(mut self, definition: WorkflowDefinition) -> Self {
        self.workflows
            .insert(definition.event(), Arc::new(definition));
        self
    }

    pub fn definition(&self, event: EventName) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(&event).cloned()
    }

    /// Find the workflow for an event and validate the event against it
    pub fn resolve(&self, event: &Event) -> Result<Arc<WorkflowDefinition>, ValidationError> {
        let definition = self
            .definition(event.name)
            .ok_or(ValidationError::Unregistered(event.name))?;

        definition.validate(event)?;
        Ok(definition)
    }

    /// Registered event names
    pub fn events(&self) -> Vec<EventName> {
        EventName::ALL
            .into_iter()
            .filter(|name| self.workflows.contains_key(name))
            .collect()
    }
}
