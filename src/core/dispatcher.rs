//! Event dispatcher.
//!
//! Accepts events, maps each to its run, and feeds runs to a pool of
//! workers. Delivery is at-least-once: redelivered events resolve to the
//! existing run instead of creating a new one, and a run already queued or
//! executing in this process is never queued twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::executor::Executor;
use crate::domain::{Event, Run, RunEvent, RunEventKind, RunStatus, ValidationError};

/// Why an event was not accepted
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The event was rejected; no run exists for it
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Failed to accept event: {0:#}")]
    Internal(#[from] anyhow::Error),
}

/// Handle to a submitted run
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: String,
    created: bool,
    status: watch::Receiver<RunStatus>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Whether this submission created the run (false for redeliveries)
    pub fn is_new(&self) -> bool {
        self.created
    }

    /// Last known status, without waiting
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Wait until the run reaches a terminal state
    pub async fn wait(mut self) -> Result<RunStatus> {
        let current = *self.status.borrow();
        if current.is_terminal() {
            return Ok(current);
        }

        let status = self
            .status
            .wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| anyhow!("Run {} stopped before finishing", self.run_id))?;

        Ok(*status)
    }
}

struct Job {
    run_id: String,
    status: watch::Sender<RunStatus>,
}

type InFlight = Arc<Mutex<HashMap<String, watch::Receiver<RunStatus>>>>;

/// Routes events to runs and runs to workers
pub struct Dispatcher {
    executor: Arc<Executor>,
    queue: mpsc::UnboundedSender<Job>,
    inflight: InFlight,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn `workers` workers (at least one) on the current runtime
    pub fn start(executor: Arc<Executor>, workers: usize) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let inflight: InFlight = Arc::new(Mutex::new(HashMap::new()));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let executor = Arc::clone(&executor);
                let receiver = Arc::clone(&receiver);
                let inflight = Arc::clone(&inflight);
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else { break };
                        run_job(worker, &executor, &inflight, job).await;
                    }
                    debug!(worker, "Worker stopped");
                })
            })
            .collect();

        Self {
            executor,
            queue,
            inflight,
            workers,
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Accept an event and make sure its run is (or was) executed.
    ///
    /// Validation happens before anything is persisted.
    #[instrument(skip(self, event), fields(event = %event.name))]
    pub fn submit(&self, event: Event) -> Result<RunHandle, SubmitError> {
        let (run, created) = self.accept(&event)?;

        if run.is_finished() {
            let (_, status) = watch::channel(run.status);
            return Ok(RunHandle {
                run_id: run.id,
                created,
                status,
            });
        }

        let status = self.enqueue(&run.id)?;
        Ok(RunHandle {
            run_id: run.id,
            created,
            status,
        })
    }

    /// Validate an event and persist its run without executing it.
    ///
    /// Returns the run and whether this call created it.
    pub fn accept(&self, event: &Event) -> Result<(Run, bool), SubmitError> {
        let definition = self.executor.registry().resolve(event)?;
        let run_id = definition.run_id(event);
        let store = self.executor.store();

        let (run, created) = store.create_run(&run_id, event)?;
        if created {
            store.append_event(&RunEvent::new(
                &run_id,
                None,
                RunEventKind::RunCreated,
                format!("Run created for '{}'", event.name),
            ))?;
            info!(%run_id, "Run created");
        } else {
            store.append_event(&RunEvent::new(
                &run_id,
                None,
                RunEventKind::Redelivered,
                format!("Redelivered '{}' resolved to existing run ({})", event.name, run.status),
            ))?;
            info!(%run_id, status = %run.status, "Redelivery resolved to existing run");
        }

        Ok((run, created))
    }

    /// Re-enqueue every run left `running`, e.g. after a crash
    #[instrument(skip(self))]
    pub fn resume_pending(&self) -> Result<Vec<RunHandle>> {
        let runs = self
            .executor
            .store()
            .list_runs(usize::MAX, Some(RunStatus::Running))?;

        let mut handles = Vec::with_capacity(runs.len());
        for run in runs {
            let status = self.enqueue(&run.id)?;
            info!(run_id = %run.id, "Resuming run");
            handles.push(RunHandle {
                run_id: run.id,
                created: false,
                status,
            });
        }

        Ok(handles)
    }

    /// Stop accepting work and wait for queued runs to drain
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker panicked");
            }
        }
    }

    /// Queue a run unless it is already queued or executing
    fn enqueue(&self, run_id: &str) -> Result<watch::Receiver<RunStatus>> {
        let mut inflight = self
            .inflight
            .lock()
            .map_err(|_| anyhow!("Dispatcher in-flight table poisoned"))?;

        if let Some(status) = inflight.get(run_id) {
            debug!(%run_id, "Run already in flight");
            return Ok(status.clone());
        }

        let (sender, receiver) = watch::channel(RunStatus::Running);
        self.queue
            .send(Job {
                run_id: run_id.to_string(),
                status: sender,
            })
            .map_err(|_| anyhow!("Dispatcher is shut down"))?;
        inflight.insert(run_id.to_string(), receiver.clone());

        Ok(receiver)
    }
}

async fn run_job(worker: usize, executor: &Executor, inflight: &InFlight, job: Job) {
    debug!(worker, run_id = %job.run_id, "Worker picked up run");

    match executor.execute(&job.run_id).await {
        Ok(run) => {
            job.status.send_replace(run.status);
        }
        // The run stays `running` in the store; `resume_pending` picks it up later
        Err(e) => {
            error!(worker, run_id = %job.run_id, error = %format!("{:#}", e), "Run execution aborted");
        }
    }

    match inflight.lock() {
        Ok(mut table) => {
            table.remove(&job.run_id);
        }
        Err(_) => warn!(run_id = %job.run_id, "Dispatcher in-flight table poisoned"),
    }
}
