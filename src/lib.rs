//! hearth - Event-driven property enrichment pipeline
//!
//! Events such as "enrich this record" or "append this generated text"
//! trigger multi-step workflows that call external providers and write
//! derived data back to a record store.
//!
//! # Architecture
//!
//! The system is built around durable, memoized steps:
//! - Every event maps deterministically to one run, so redelivery is safe
//! - Each step's result is committed together with its record mutations
//! - A succeeded step is never executed again; resumption adopts its result
//! - Run and step lifecycle changes are journaled for audit
//!
//! # Modules
//!
//! - `adapters`: External providers (realty listings, nearby places) and financing math
//! - `core`: Store, executor, dispatcher, step and workflow abstractions
//! - `domain`: Data structures (Event, Run, PropertyRecord, RecordWrite)
//! - `workflows`: The concrete steps and the event → workflow registry
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Enrich a record
//! hearth submit enrich-record --data '{"recordId": "R1", "ownerId": "u1"}'
//!
//! # Check run status
//! hearth status <run-id> --journal
//!
//! # Re-drive runs interrupted by a crash
//! hearth resume
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod workflows;

// Re-export main types at crate root for convenience
pub use crate::core::{Dispatcher, Executor, RetryPolicy, RunHandle, Store};
pub use domain::{Event, EventName, PropertyRecord, Run, RunStatus};
