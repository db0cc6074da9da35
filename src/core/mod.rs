//! Core orchestration logic.
//!
//! This module contains:
//! - Store: Durable records, counters, runs and step memos (SQLite)
//! - Step / Workflow: The step abstraction and per-event workflow definitions
//! - Executor: Drives one run through its steps with retry and memoization
//! - Dispatcher: Maps events to runs and feeds them to a worker pool

pub mod dispatcher;
pub mod executor;
pub mod retry;
pub mod step;
pub mod store;
pub mod workflow;

// Re-export commonly used types
pub use dispatcher::{Dispatcher, RunHandle, SubmitError};
pub use executor::Executor;
pub use retry::RetryPolicy;
pub use step::{Step, StepContext, StepError, StepOutput};
pub use store::{ClaimOutcome, MemoPut, Store};
pub use workflow::{hash_input, Registry, WorkflowDefinition};
