//! Runs and their journal.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use super::memo::{steps_in, UnknownValue};
use super::{conversion_error, optional_timestamp_column, timestamp_column, Store};
use crate::domain::{Event, EventName, Run, RunEvent, RunEventKind, RunStatus};

const RUN_COLUMNS: &str =
    "id, event_name, event_data, status, error, failed_step, created_at, updated_at, completed_at";

impl Store {
    /// Create the run for an event, or load it if it already exists.
    ///
    /// Returns the run and whether this call created it.
    pub fn create_run(&self, run_id: &str, event: &Event) -> Result<(Run, bool)> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let data = serde_json::to_string(&event.data).context("Failed to serialize event data")?;

        let created = conn
            .execute(
                "INSERT OR IGNORE INTO runs (id, event_name, event_data, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'running', ?4, ?4)",
                params![run_id, event.name.as_str(), data, now],
            )
            .with_context(|| format!("Failed to create run {}", run_id))?
            == 1;

        let run = run_in(&conn, run_id)?
            .with_context(|| format!("Run {} missing after create", run_id))?;

        Ok((run, created))
    }

    /// Load a run with its step records
    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let conn = self.conn()?;
        run_in(&conn, run_id)
    }

    /// Most recent runs first, optionally filtered by status
    pub fn list_runs(&self, limit: usize, status: Option<RunStatus>) -> Result<Vec<Run>> {
        let conn = self.conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut runs = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE status = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![status.as_str(), limit], run_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit], run_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            }
        }
        .context("Failed to list runs")?;

        for run in &mut runs {
            run.steps = steps_in(&conn, &run.id)?;
        }

        Ok(runs)
    }

    /// Mark a running run completed. Returns false if it was already terminal.
    pub fn complete_run(&self, run_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let changed = conn
            .execute(
                "UPDATE runs SET status = 'completed', updated_at = ?2, completed_at = ?2
                 WHERE id = ?1 AND status = 'running'",
                params![run_id, now],
            )
            .with_context(|| format!("Failed to complete run {}", run_id))?;

        Ok(changed == 1)
    }

    /// Mark a running run failed at `step`. Returns false if it was already terminal.
    pub fn fail_run(&self, run_id: &str, step: &str, reason: &str) -> Result<bool> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let changed = conn
            .execute(
                "UPDATE runs SET status = 'failed', error = ?3, failed_step = ?2,
                    updated_at = ?4, completed_at = ?4
                 WHERE id = ?1 AND status = 'running'",
                params![run_id, step, reason, now],
            )
            .with_context(|| format!("Failed to mark run {} failed", run_id))?;

        Ok(changed == 1)
    }

    /// Append an entry to a run's journal
    pub fn append_event(&self, event: &RunEvent) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO run_events (id, run_id, step, kind, summary, attempt, duration_ms, error, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id.to_string(),
                event.run_id,
                event.step,
                event.kind.as_str(),
                event.summary,
                event.attempt,
                event.duration_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
                event.error,
                event.timestamp.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to journal {} for run {}", event.kind.as_str(), event.run_id))?;

        Ok(())
    }

    /// Journal of a run, oldest first
    pub fn run_events(&self, run_id: &str) -> Result<Vec<RunEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, run_id, step, kind, summary, attempt, duration_ms, error, timestamp
             FROM run_events WHERE run_id = ?1 ORDER BY timestamp, rowid",
        )?;

        let events = stmt
            .query_map(params![run_id], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to load journal of run {}", run_id))?;

        Ok(events)
    }
}

fn run_in(conn: &Connection, run_id: &str) -> Result<Option<Run>> {
    let run = conn
        .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
            params![run_id],
            run_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to load run {}", run_id))?;

    match run {
        Some(mut run) => {
            run.steps = steps_in(conn, run_id)?;
            Ok(Some(run))
        }
        None => Ok(None),
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let name: String = row.get("event_name")?;
    let name: EventName = name
        .parse()
        .map_err(|e| conversion_error(row, "event_name", e))?;

    let data: String = row.get("event_data")?;
    let data: Map<String, Value> =
        serde_json::from_str(&data).map_err(|e| conversion_error(row, "event_data", e))?;

    let status: String = row.get("status")?;
    let status = RunStatus::parse(&status)
        .ok_or_else(|| conversion_error(row, "status", UnknownValue(status.clone())))?;

    Ok(Run {
        id: row.get("id")?,
        event: Event { name, data },
        status,
        error: row.get("error")?,
        failed_step: row.get("failed_step")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
        completed_at: optional_timestamp_column(row, "completed_at")?,
        steps: Vec::new(),
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<RunEvent> {
    let id: String = row.get("id")?;
    let kind: String = row.get("kind")?;
    let duration_ms: Option<i64> = row.get("duration_ms")?;

    Ok(RunEvent {
        id: id.parse().map_err(|e| conversion_error(row, "id", e))?,
        timestamp: timestamp_column(row, "timestamp")?,
        run_id: row.get("run_id")?,
        step: row.get("step")?,
        kind: RunEventKind::parse(&kind)
            .ok_or_else(|| conversion_error(row, "kind", UnknownValue(kind.clone())))?,
        summary: row.get("summary")?,
        attempt: row.get("attempt")?,
        duration_ms: duration_ms.map(|ms| u64::try_from(ms).unwrap_or(0)),
        error: row.get("error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fields;

    fn event() -> Event {
        Event::new(EventName::EnrichRecord).with(fields::RECORD_ID, "R1")
    }

    #[test]
    fn test_create_run_is_idempotent() {
        let store = Store::in_memory().unwrap();

        let (run, created) = store.create_run("enrich-record:01", &event()).unwrap();
        assert!(created);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.event, event());

        let redelivered = event().with(fields::OWNER_ID, "someone-else");
        let (again, created) = store.create_run("enrich-record:01", &redelivered).unwrap();
        assert!(!created);
        // The first delivery's payload wins
        assert_eq!(again.event, event());
    }

    #[test]
    fn test_terminal_transitions_happen_once() {
        let store = Store::in_memory().unwrap();
        store.create_run("run-1", &event()).unwrap();

        assert!(store.fail_run("run-1", "financing", "No price").unwrap());
        assert!(!store.complete_run("run-1").unwrap());
        assert!(!store.fail_run("run-1", "nearby-places", "other").unwrap());

        let run = store.get_run("run-1").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failed_step.as_deref(), Some("financing"));
        assert_eq!(run.error.as_deref(), Some("No price"));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_list_runs_filters_by_status() {
        let store = Store::in_memory().unwrap();
        store.create_run("run-1", &event()).unwrap();
        store.create_run("run-2", &event()).unwrap();
        store.complete_run("run-2").unwrap();

        assert_eq!(store.list_runs(10, None).unwrap().len(), 2);

        let running = store.list_runs(10, Some(RunStatus::Running)).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "run-1");
    }

    #[test]
    fn test_journal_round_trip() {
        let store = Store::in_memory().unwrap();
        store
            .append_event(&RunEvent::new("run-1", None, RunEventKind::RunCreated, "created"))
            .unwrap();
        store
            .append_event(
                &RunEvent::new("run-1", Some("financing"), RunEventKind::StepCompleted, "done")
                    .with_attempt(1)
                    .with_duration(12),
            )
            .unwrap();

        let journal = store.run_events("run-1").unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[0].kind, RunEventKind::RunCreated);
        assert_eq!(journal[1].duration_ms, Some(12));
        assert!(store.run_events("run-2").unwrap().is_empty());
    }
}
