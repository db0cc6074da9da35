//! Run state and per-step memoization records.
//!
//! A Run represents a single execution of a workflow for one logical event.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::Event;

/// A workflow execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Deterministic identifier derived from the triggering event
    pub id: String,

    /// The event as first delivered
    pub event: Event,

    /// Current state of the run
    pub status: RunStatus,

    /// Failure reason (when failed)
    pub error: Option<String>,

    /// Step that failed the run (when failed)
    pub failed_step: Option<String>,

    /// When the run was created
    pub created_at: DateTime<Utc>,

    /// Last status change
    pub updated_at: DateTime<Utc>,

    /// When the run reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Step records in the order they were first attempted
    pub steps: Vec<StepRecord>,
}

impl Run {
    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Check if the run has finished (successfully or not)
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Find the record of a step by name
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step == name)
    }

    /// Check if a specific step has succeeded
    pub fn is_step_succeeded(&self, name: &str) -> bool {
        self.step(name)
            .map(|s| s.status == StepStatus::Succeeded)
            .unwrap_or(false)
    }
}

/// State of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Steps remain to be executed
    #[default]
    Running,

    /// Every step succeeded
    Completed,

    /// A step failed permanently or exhausted its retries
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed and failed runs never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memoization record for one (run, step) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: String,
    pub step: String,
    pub status: StepStatus,

    /// Result payload; opaque to the executor
    pub result: Option<Value>,

    /// Number of times the step body has been entered
    pub attempts: u32,

    /// Last error seen (cleared on success)
    pub error: Option<String>,

    pub updated_at: DateTime<Utc>,
}

/// Status of a step record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Attempted but not yet succeeded
    #[default]
    Pending,

    /// Completed; never executed again
    Succeeded,

    /// Failed permanently
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
