//! Workflow executor.
//!
//! Drives one run through its workflow's steps in order. Succeeded steps are
//! never executed again: their memoized result is adopted instead, which is
//! what makes re-entry after a crash or a redelivery safe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use super::retry::RetryPolicy;
use super::step::{Step, StepContext, StepError};
use super::store::{MemoPut, Store};
use super::workflow::Registry;
use crate::domain::{Run, RunEvent, RunEventKind, StepStatus};

/// How a single step ended
enum StepOutcome {
    Succeeded(Value),
    Failed(String),
}

/// Runs workflows against the durable store
pub struct Executor {
    store: Arc<Store>,
    registry: Arc<Registry>,
    retry: RetryPolicy,
}

impl Executor {
    pub fn new(store: Arc<Store>, registry: Arc<Registry>, retry: RetryPolicy) -> Self {
        Self {
            store,
            registry,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Execute (or resume) a run until it completes or fails.
    ///
    /// Terminal runs are returned unchanged.
    #[instrument(skip(self))]
    pub async fn execute(&self, run_id: &str) -> Result<Run> {
        let run = self
            .store
            .get_run(run_id)?
            .with_context(|| format!("Run not found: {}", run_id))?;

        if run.is_finished() {
            info!(status = %run.status, "Run already finished");
            return Ok(run);
        }

        let definition = self
            .registry
            .definition(run.event.name)
            .ok_or_else(|| anyhow!("No workflow registered for event '{}'", run.event.name))?;

        let resumed = !run.steps.is_empty();
        self.journal(RunEvent::new(
            run_id,
            None,
            RunEventKind::RunStarted,
            if resumed {
                format!("Workflow '{}' resumed", run.event.name)
            } else {
                format!("Workflow '{}' started", run.event.name)
            },
        ))?;
        info!(workflow = %run.event.name, resumed, "Executing run");

        let mut outputs: HashMap<String, Value> = HashMap::new();

        for step in definition.steps() {
            let name = step.name();

            match run.step(name) {
                Some(record) if record.status == StepStatus::Succeeded => {
                    info!(step = %name, "Step already succeeded, skipping");
                    self.journal(RunEvent::new(
                        run_id,
                        Some(name),
                        RunEventKind::StepSkipped,
                        format!("Step '{}' already succeeded; adopted memoized result", name),
                    ))?;
                    outputs.insert(
                        name.to_string(),
                        record.result.clone().unwrap_or(Value::Null),
                    );
                    continue;
                }
                Some(record) if record.status == StepStatus::Failed => {
                    let reason = record
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("Step '{}' failed", name));
                    return self.fail(&run, name, &reason);
                }
                _ => {}
            }

            match self.run_step(&run, step.as_ref(), &outputs).await? {
                StepOutcome::Succeeded(value) => {
                    outputs.insert(name.to_string(), value);
                }
                StepOutcome::Failed(reason) => return self.fail(&run, name, &reason),
            }
        }

        if self.store.complete_run(run_id)? {
            self.journal(RunEvent::new(
                run_id,
                None,
                RunEventKind::RunCompleted,
                format!("Workflow '{}' completed", run.event.name),
            ))?;
            info!("Run completed successfully");
        }

        self.reload(run_id)
    }

    /// Attempt one step until it succeeds, fails permanently or runs out of attempts
    async fn run_step(
        &self,
        run: &Run,
        step: &dyn Step,
        outputs: &HashMap<String, Value>,
    ) -> Result<StepOutcome> {
        let name = step.name();

        loop {
            let attempt = self.store.begin_attempt(&run.id, name)?;

            // Attempts persisted by earlier executions count against the budget
            if attempt > self.retry.max_attempts {
                let reason = format!(
                    "Step '{}' exhausted its retry budget ({} attempts)",
                    name, self.retry.max_attempts
                );
                self.store
                    .record_step_error(&run.id, name, &reason, StepStatus::Failed)?;
                self.journal(
                    RunEvent::new(&run.id, Some(name), RunEventKind::StepFailed, &reason)
                        .with_attempt(attempt)
                        .with_error(&reason),
                )?;
                error!(step = %name, attempt, "Retry budget exhausted before attempt");
                return Ok(StepOutcome::Failed(reason));
            }

            self.journal(
                RunEvent::new(
                    &run.id,
                    Some(name),
                    RunEventKind::StepStarted,
                    format!("Step '{}' started (attempt {})", name, attempt),
                )
                .with_attempt(attempt),
            )?;

            let started = Instant::now();
            let ctx = StepContext {
                run_id: &run.id,
                event: &run.event,
                attempt,
                store: &self.store,
                outputs,
            };

            let result = match step.execute(&ctx).await {
                Ok(output) => self
                    .store
                    .put_step(&run.id, name, &output.value, &output.writes)
                    .map_err(StepError::storage),
                Err(e) => Err(e),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(MemoPut::Committed(record)) => {
                    self.journal(
                        RunEvent::new(
                            &run.id,
                            Some(name),
                            RunEventKind::StepCompleted,
                            format!("Step '{}' completed in {}ms", name, duration_ms),
                        )
                        .with_attempt(attempt)
                        .with_duration(duration_ms),
                    )?;
                    info!(step = %name, attempt, duration_ms, "Step completed");
                    return Ok(StepOutcome::Succeeded(record.result.unwrap_or(Value::Null)));
                }
                Ok(MemoPut::Conflict(existing)) => {
                    self.journal(
                        RunEvent::new(
                            &run.id,
                            Some(name),
                            RunEventKind::StepAdopted,
                            format!(
                                "Step '{}' was committed by a concurrent execution; result adopted",
                                name
                            ),
                        )
                        .with_attempt(attempt)
                        .with_duration(duration_ms),
                    )?;
                    warn!(step = %name, attempt, "Memo conflict, adopting existing result");
                    return Ok(StepOutcome::Succeeded(existing.result.unwrap_or(Value::Null)));
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    let message = e.to_string();

                    self.store
                        .record_step_error(&run.id, name, &message, StepStatus::Pending)?;
                    self.journal(
                        RunEvent::new(
                            &run.id,
                            Some(name),
                            RunEventKind::StepRetrying,
                            format!(
                                "Step '{}' failed, retrying in {:?}: {}",
                                name, delay, message
                            ),
                        )
                        .with_attempt(attempt)
                        .with_duration(duration_ms)
                        .with_error(&message),
                    )?;

                    warn!(
                        step = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Step failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let reason = if e.is_retryable() {
                        format!("{} (gave up after {} attempts)", e, attempt)
                    } else {
                        e.to_string()
                    };

                    self.store
                        .record_step_error(&run.id, name, &reason, StepStatus::Failed)?;
                    self.journal(
                        RunEvent::new(
                            &run.id,
                            Some(name),
                            RunEventKind::StepFailed,
                            format!("Step '{}' failed after {} attempts", name, attempt),
                        )
                        .with_attempt(attempt)
                        .with_duration(duration_ms)
                        .with_error(&reason),
                    )?;

                    error!(step = %name, attempt, error = %reason, "Step failed permanently");
                    return Ok(StepOutcome::Failed(reason));
                }
            }
        }
    }

    /// Move the run to `failed` and record why
    fn fail(&self, run: &Run, step: &str, reason: &str) -> Result<Run> {
        if self.store.fail_run(&run.id, step, reason)? {
            self.journal(
                RunEvent::new(
                    &run.id,
                    Some(step),
                    RunEventKind::RunFailed,
                    format!("Workflow '{}' failed at step '{}'", run.event.name, step),
                )
                .with_error(reason),
            )?;
            error!(run_id = %run.id, step = %step, error = %reason, "Run failed");
        }

        self.reload(&run.id)
    }

    fn journal(&self, event: RunEvent) -> Result<()> {
        self.store.append_event(&event)
    }

    fn reload(&self, run_id: &str) -> Result<Run> {
        self.store
            .get_run(run_id)?
            .with_context(|| format!("Run disappeared: {}", run_id))
    }
}
