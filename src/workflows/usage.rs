//! Usage accounting step.
//!
//! Counting happens inside a memoized step, so a redelivered event or a
//! resumed run never counts twice.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::core::{Step, StepContext, StepError, StepOutput};
use crate::domain::{fields, RecordWrite, UsageKind};

pub const COUNT_USAGE: &str = "count-usage";

/// Add one to the owner's counter of `kind`
pub struct CountUsage {
    kind: UsageKind,
}

impl CountUsage {
    pub fn new(kind: UsageKind) -> Self {
        Self { kind }
    }

    /// The event's owner, else the owner of the event's record
    fn owner(&self, ctx: &StepContext<'_>) -> Result<Option<String>, StepError> {
        if let Some(owner) = ctx.event.field(fields::OWNER_ID) {
            return Ok(Some(owner));
        }

        let Some(record_id) = ctx.event.field(fields::RECORD_ID) else {
            return Ok(None);
        };

        let record = ctx
            .store
            .get_record(&record_id)
            .map_err(StepError::storage)?;
        Ok(record.and_then(|r| r.owner_id))
    }
}

#[async_trait]
impl Step for CountUsage {
    fn name(&self) -> &str {
        COUNT_USAGE
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let Some(owner_id) = self.owner(ctx)? else {
            warn!(run_id = ctx.run_id, kind = %self.kind, "No owner to charge, usage not counted");
            return StepOutput::new(&json!({ "counted": false }));
        };

        info!(run_id = ctx.run_id, %owner_id, kind = %self.kind, "Counting usage");

        Ok(StepOutput::new(&json!({
            "counted": true,
            "ownerId": owner_id,
            "kind": self.kind,
        }))?
        .with_write(RecordWrite::IncrementUsage {
            owner_id,
            kind: self.kind,
        }))
    }
}
