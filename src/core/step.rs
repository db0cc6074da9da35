//! The step abstraction.
//!
//! A step is one unit of work inside a workflow. It reads the triggering
//! event, earlier step outputs and the record store, talks to adapters, and
//! returns a JSON result plus the record mutations it wants applied. It
//! never writes to the store itself and never retries; both are executor
//! concerns.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::store::Store;
use crate::adapters::AdapterError;
use crate::domain::{Event, RecordWrite};

/// A named unit of work inside a workflow
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used as the memo key; unique within a workflow
    fn name(&self) -> &str;

    /// Run the step body once
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError>;
}

/// What a step body sees
pub struct StepContext<'a> {
    pub run_id: &'a str,
    pub event: &'a Event,

    /// Attempt number of this invocation (1-indexed)
    pub attempt: u32,

    /// Read access to records; writes go through [`StepOutput::writes`]
    pub store: &'a Store,

    /// Results of the steps that ran before this one
    pub outputs: &'a HashMap<String, Value>,
}

impl StepContext<'_> {
    /// Read a field the step cannot run without
    pub fn require(&self, field: &str) -> Result<String, StepError> {
        self.event
            .field(field)
            .ok_or_else(|| StepError::Permanent(format!("Event is missing field '{}'", field)))
    }

    /// Decode the result of an earlier step
    pub fn output<T: DeserializeOwned>(&self, step: &str) -> Result<T, StepError> {
        let value = self.outputs.get(step).ok_or_else(|| {
            StepError::Permanent(format!("No output from step '{}' is available", step))
        })?;

        serde_json::from_value(value.clone()).map_err(|e| {
            StepError::Permanent(format!("Output of step '{}' is malformed: {}", step, e))
        })
    }
}

/// Successful result of a step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Memoized result; later steps read it via [`StepContext::output`]
    pub value: Value,

    /// Record mutations committed atomically with the memo record
    pub writes: Vec<RecordWrite>,
}

impl StepOutput {
    /// Output carrying a serialized value and no writes
    pub fn new(value: &impl Serialize) -> Result<Self, StepError> {
        let value = serde_json::to_value(value)
            .map_err(|e| StepError::Permanent(format!("Failed to serialize step result: {}", e)))?;

        Ok(Self {
            value,
            writes: Vec::new(),
        })
    }

    pub fn with_write(mut self, write: RecordWrite) -> Self {
        self.writes.push(write);
        self
    }
}

/// Classified step failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Worth retrying (network, 5xx, 429, timeouts, storage contention)
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help (missing data, 4xx, malformed responses)
    #[error("{0}")]
    Permanent(String),
}

impl StepError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Storage failures inside a step body are treated as transient
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Transient(format!("Storage error: {:#}", err))
    }
}

impl From<AdapterError> for StepError {
    fn from(err: AdapterError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}
