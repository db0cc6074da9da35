//! Run journal entries.
//!
//! Every lifecycle change of a run is appended to an append-only journal
//! next to the run itself. The journal is the audit trail; the run row is
//! the queryable current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry in a run's journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique identifier for this entry
    pub id: Uuid,

    /// When this happened (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this entry belongs to
    pub run_id: String,

    /// Step name (if applicable)
    pub step: Option<String>,

    /// What happened
    pub kind: RunEventKind,

    /// Human-readable summary (NO secrets)
    pub summary: String,

    /// Attempt number (for step entries)
    pub attempt: Option<u32>,

    /// Time taken in milliseconds (for finished steps)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl RunEvent {
    /// Create a new entry with the current timestamp
    pub fn new(
        run_id: &str,
        step: Option<&str>,
        kind: RunEventKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            step: step.map(str::to_string),
            kind,
            summary: summary.into(),
            attempt: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Kinds of journal entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    /// First delivery created the run
    RunCreated,

    /// A redelivered event resolved to this existing run
    Redelivered,

    /// The executor started (or re-entered) the run
    RunStarted,

    /// All steps succeeded
    RunCompleted,

    /// A step failed permanently
    RunFailed,

    /// A step attempt began
    StepStarted,

    /// A step was skipped because it already succeeded
    StepSkipped,

    /// A step committed its result
    StepCompleted,

    /// A concurrent execution committed first; its result was adopted
    StepAdopted,

    /// A step failed transiently and will be retried
    StepRetrying,

    /// A step failed for good
    StepFailed,
}

impl RunEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunCreated => "run_created",
            Self::Redelivered => "redelivered",
            Self::RunStarted => "run_started",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
            Self::StepStarted => "step_started",
            Self::StepSkipped => "step_skipped",
            Self::StepCompleted => "step_completed",
            Self::StepAdopted => "step_adopted",
            Self::StepRetrying => "step_retrying",
            Self::StepFailed => "step_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::RunCreated,
            Self::Redelivered,
            Self::RunStarted,
            Self::RunCompleted,
            Self::RunFailed,
            Self::StepStarted,
            Self::StepSkipped,
            Self::StepCompleted,
            Self::StepAdopted,
            Self::StepRetrying,
            Self::StepFailed,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builders() {
        let event = RunEvent::new(
            "enrich-record:abc",
            Some("financing"),
            RunEventKind::StepFailed,
            "Step 'financing' failed",
        )
        .with_attempt(2)
        .with_duration(1500)
        .with_error("No price was found");

        assert_eq!(event.step.as_deref(), Some("financing"));
        assert_eq!(event.attempt, Some(2));
        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.error.as_deref(), Some("No price was found"));
    }

    #[test]
    fn test_kind_names_match_serde() {
        let kind = RunEventKind::StepRetrying;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{}\"", kind.as_str()));
        assert_eq!(RunEventKind::parse(kind.as_str()), Some(kind));
        assert_eq!(RunEventKind::parse("bogus"), None);
    }
}
