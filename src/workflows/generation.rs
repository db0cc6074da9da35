//! Generated-content log step.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::load_record;
use crate::core::{Step, StepContext, StepError, StepOutput};
use crate::domain::{fields, GeneratedContent, RecordWrite};

pub const APPEND_GENERATION: &str = "append-generation";

/// Append one generated text entry to the event's record
pub struct AppendGeneration;

#[async_trait]
impl Step for AppendGeneration {
    fn name(&self) -> &str {
        APPEND_GENERATION
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let record = load_record(ctx)?;

        let entry = GeneratedContent {
            id: Uuid::new_v4(),
            record_id: record.id,
            run_id: ctx.run_id.to_string(),
            prompt: ctx.require(fields::PROMPT)?,
            text: ctx.require(fields::TEXT)?,
            model: ctx.require(fields::MODEL)?,
            created_at: Utc::now(),
        };
        info!(record_id = %entry.record_id, generation_id = %entry.id, model = %entry.model, "Appending generation");

        Ok(StepOutput::new(&json!({ "generationId": entry.id }))?
            .with_write(RecordWrite::AppendGeneration(entry)))
    }
}
