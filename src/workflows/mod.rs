//! The pipeline's workflows.
//!
//! | Event | Steps |
//! |-------|-------|
//! | enrich-record | fetch-details → financing → nearby-places → [recently-sold] → count-usage |
//! | record-usage-increment | count-usage |
//! | add-generation | append-generation → count-usage |
//! | generation-usage-increment | count-usage |
//! | claim-record | claim |
//!
//! Financing runs before nearby-places so that a listing without a price
//! fails the run before any places lookup is made.

pub mod claim;
pub mod enrich;
pub mod generation;
pub mod usage;

use std::sync::Arc;

use crate::adapters::Adapters;
use crate::config::EnrichmentSettings;
use crate::core::{Registry, StepContext, StepError, WorkflowDefinition};
use crate::domain::{fields, EventName, PropertyRecord, UsageKind};

pub use claim::ClaimRecord;
pub use enrich::{ComputeFinancing, FetchDetails, FetchNearbyPlaces, FetchRecentlySold, ListingSummary};
pub use generation::AppendGeneration;
pub use usage::CountUsage;

/// Build the registry of every workflow
pub fn registry(adapters: &Adapters, settings: &EnrichmentSettings) -> Registry {
    Registry::new()
        .register(enrich_record(adapters, settings))
        .register(usage_increment(
            EventName::RecordUsageIncrement,
            UsageKind::Enrichments,
        ))
        .register(add_generation())
        .register(usage_increment(
            EventName::GenerationUsageIncrement,
            UsageKind::Generations,
        ))
        .register(claim_record())
}

pub fn enrich_record(adapters: &Adapters, settings: &EnrichmentSettings) -> WorkflowDefinition {
    let mut definition = WorkflowDefinition::new(EventName::EnrichRecord)
        .require(&[fields::RECORD_ID, fields::OWNER_ID])
        .identity(&[fields::RECORD_ID])
        .step(Arc::new(FetchDetails::new(Arc::clone(&adapters.property))))
        .step(Arc::new(ComputeFinancing::new(settings.interest_rate)))
        .step(Arc::new(FetchNearbyPlaces::new(Arc::clone(&adapters.places))));

    if settings.recently_sold {
        definition = definition.step(Arc::new(FetchRecentlySold::new(
            Arc::clone(&adapters.property),
            settings.recently_sold_limit,
        )));
    }

    definition.step(Arc::new(CountUsage::new(UsageKind::Enrichments)))
}

/// Standalone counter increment; deduplicated per (owner, record)
pub fn usage_increment(event: EventName, kind: UsageKind) -> WorkflowDefinition {
    WorkflowDefinition::new(event)
        .require(&[fields::OWNER_ID])
        .identity(&[fields::OWNER_ID, fields::RECORD_ID])
        .subject(fields::RECORD_ID)
        .step(Arc::new(CountUsage::new(kind)))
}

pub fn add_generation() -> WorkflowDefinition {
    let content = [fields::RECORD_ID, fields::PROMPT, fields::TEXT, fields::MODEL];

    WorkflowDefinition::new(EventName::AddGeneration)
        .require(&content)
        .identity(&content)
        .step(Arc::new(AppendGeneration))
        .step(Arc::new(CountUsage::new(UsageKind::Generations)))
}

pub fn claim_record() -> WorkflowDefinition {
    WorkflowDefinition::new(EventName::ClaimRecord)
        .require(&[fields::RECORD_ID])
        .identity(&[fields::RECORD_ID])
        .step(Arc::new(ClaimRecord))
}

/// Load the event's record, failing permanently if it does not exist
pub(crate) fn load_record(ctx: &StepContext<'_>) -> Result<PropertyRecord, StepError> {
    let record_id = ctx.require(fields::RECORD_ID)?;
    ctx.store
        .get_record(&record_id)
        .map_err(StepError::storage)?
        .ok_or_else(|| StepError::Permanent(format!("Record {} not found", record_id)))
}
