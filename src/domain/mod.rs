//! Domain types for the hearth pipeline.
//!
//! This module contains the core data structures:
//! - Events: Messages that trigger workflow runs
//! - Run: Workflow execution state and step memo records
//! - Journal: Append-only audit entries per run
//! - Record: Property records and enrichment payloads
//! - Usage: Per-owner counters
//! - Write: Store mutations returned by steps

pub mod events;
pub mod journal;
pub mod record;
pub mod run;
pub mod usage;
pub mod write;

// Re-export commonly used types
pub use events::{fields, Event, EventName, ValidationError};
pub use journal::{RunEvent, RunEventKind};
pub use record::{
    EquityPoint, Financing, FinancingScenario, GeneratedContent, ListingDetail, LoanType,
    NearbyPlace, PropertyRecord, SoldComparable,
};
pub use run::{Run, RunStatus, StepRecord, StepStatus};
pub use usage::{UsageCounter, UsageKind};
pub use write::RecordWrite;
