//! Record claim step.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::load_record;
use crate::core::{Step, StepContext, StepError, StepOutput};
use crate::domain::RecordWrite;

pub const CLAIM: &str = "claim";

/// Flip the record's `claimed` flag; already-claimed records are left as-is
pub struct ClaimRecord;

#[async_trait]
impl Step for ClaimRecord {
    fn name(&self) -> &str {
        CLAIM
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let record = load_record(ctx)?;
        info!(record_id = %record.id, already_claimed = record.claimed, "Claiming record");

        Ok(StepOutput::new(&json!({ "previouslyClaimed": record.claimed }))?
            .with_write(RecordWrite::Claim {
                record_id: record.id,
            }))
    }
}
