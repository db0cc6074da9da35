//! Step memo records with compare-and-set semantics.
//!
//! A (run, step) pair moves pending → succeeded at most once. The write that
//! performs that transition also applies the step's record mutations, inside
//! one transaction. A losing writer sees the winner's record and applies
//! nothing.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::{apply_write, conversion_error, json_column, timestamp_column, Store};
use crate::domain::{RecordWrite, StepRecord, StepStatus};

/// Outcome of writing a succeeded step record
#[derive(Debug, Clone, PartialEq)]
pub enum MemoPut {
    /// This call stored the result and applied its writes
    Committed(StepRecord),

    /// The step had already succeeded; the stored record is returned as-is
    Conflict(StepRecord),
}

impl MemoPut {
    /// The record that is now authoritative
    pub fn record(&self) -> &StepRecord {
        match self {
            Self::Committed(record) | Self::Conflict(record) => record,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

const STEP_COLUMNS: &str = "run_id, step, status, result, attempts, error, updated_at";

impl Store {
    /// Load the memo record of one step
    pub fn get_step(&self, run_id: &str, step: &str) -> Result<Option<StepRecord>> {
        let conn = self.conn()?;
        step_in(&conn, run_id, step)
    }

    /// Store a step's result and apply its writes, unless it already succeeded
    pub fn put_step(
        &self,
        run_id: &str,
        step: &str,
        result: &Value,
        writes: &[RecordWrite],
    ) -> Result<MemoPut> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .context("Failed to begin step transaction")?;
        let now = Utc::now();

        let json = serde_json::to_string(result).context("Failed to serialize step result")?;
        let changed = tx
            .execute(
                "INSERT INTO step_records (run_id, step, status, result, attempts, error, updated_at)
                 VALUES (?1, ?2, 'succeeded', ?3, 1, NULL, ?4)
                 ON CONFLICT (run_id, step) DO UPDATE SET
                    status = 'succeeded',
                    result = excluded.result,
                    error = NULL,
                    updated_at = excluded.updated_at
                 WHERE step_records.status != 'succeeded'",
                params![run_id, step, json, now.to_rfc3339()],
            )
            .with_context(|| format!("Failed to store result of step '{}'", step))?;

        if changed == 0 {
            let existing = step_in(&tx, run_id, step)?
                .with_context(|| format!("Step '{}' vanished during commit", step))?;
            // Dropping the transaction rolls it back
            return Ok(MemoPut::Conflict(existing));
        }

        for write in writes {
            apply_write(&tx, write, now).with_context(|| {
                format!("Step '{}' failed to apply {}", step, write.label())
            })?;
        }

        let record = step_in(&tx, run_id, step)?
            .with_context(|| format!("Step '{}' missing after commit", step))?;
        tx.commit().context("Failed to commit step transaction")?;

        Ok(MemoPut::Committed(record))
    }

    /// Count one more attempt of a step and return the new total.
    ///
    /// Succeeded steps are left untouched.
    pub fn begin_attempt(&self, run_id: &str, step: &str) -> Result<u32> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let attempts: Option<i64> = conn
            .query_row(
                "INSERT INTO step_records (run_id, step, status, attempts, updated_at)
                 VALUES (?1, ?2, 'pending', 1, ?3)
                 ON CONFLICT (run_id, step) DO UPDATE SET
                    attempts = step_records.attempts + 1,
                    updated_at = excluded.updated_at
                 WHERE step_records.status != 'succeeded'
                 RETURNING attempts",
                params![run_id, step, now],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to record attempt of step '{}'", step))?;

        match attempts {
            Some(n) => Ok(u32::try_from(n).unwrap_or(u32::MAX)),
            None => {
                let existing = step_in(&conn, run_id, step)?;
                Ok(existing.map(|r| r.attempts).unwrap_or(0))
            }
        }
    }

    /// Record a step error; `status` is pending for retryable errors, failed otherwise
    pub fn record_step_error(
        &self,
        run_id: &str,
        step: &str,
        error: &str,
        status: StepStatus,
    ) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "UPDATE step_records SET status = ?3, error = ?4, updated_at = ?5
             WHERE run_id = ?1 AND step = ?2 AND status != 'succeeded'",
            params![run_id, step, status.as_str(), error, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to record error of step '{}'", step))?;

        Ok(())
    }

    /// All step records of a run, in the order they were first attempted
    pub fn list_steps(&self, run_id: &str) -> Result<Vec<StepRecord>> {
        let conn = self.conn()?;
        steps_in(&conn, run_id)
    }
}

pub(super) fn steps_in(conn: &Connection, run_id: &str) -> Result<Vec<StepRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STEP_COLUMNS} FROM step_records WHERE run_id = ?1 ORDER BY rowid"
    ))?;

    let steps = stmt
        .query_map(params![run_id], step_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("Failed to load steps of run {}", run_id))?;

    Ok(steps)
}

fn step_in(conn: &Connection, run_id: &str, step: &str) -> Result<Option<StepRecord>> {
    conn.query_row(
        &format!("SELECT {STEP_COLUMNS} FROM step_records WHERE run_id = ?1 AND step = ?2"),
        params![run_id, step],
        step_from_row,
    )
    .optional()
    .with_context(|| format!("Failed to load step '{}' of run {}", step, run_id))
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<StepRecord> {
    let status: String = row.get("status")?;
    let attempts: i64 = row.get("attempts")?;

    Ok(StepRecord {
        run_id: row.get("run_id")?,
        step: row.get("step")?,
        status: StepStatus::parse(&status).ok_or_else(|| {
            conversion_error(row, "status", UnknownValue(status.clone()))
        })?,
        result: json_column(row, "result")?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        error: row.get("error")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}

/// A stored enum column held a value this build does not know
#[derive(Debug, thiserror::Error)]
#[error("unknown value '{0}'")]
pub(super) struct UnknownValue(pub(super) String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PropertyRecord, UsageKind};
    use serde_json::json;

    #[test]
    fn test_attempts_accumulate_until_success() {
        let store = Store::in_memory().unwrap();

        assert_eq!(store.begin_attempt("run-1", "financing").unwrap(), 1);
        store
            .record_step_error("run-1", "financing", "timeout", StepStatus::Pending)
            .unwrap();
        assert_eq!(store.begin_attempt("run-1", "financing").unwrap(), 2);

        let put = store
            .put_step("run-1", "financing", &json!({"ok": true}), &[])
            .unwrap();
        assert!(put.is_committed());
        assert_eq!(put.record().attempts, 2);
        assert_eq!(put.record().error, None);

        // Attempts stop counting once succeeded
        assert_eq!(store.begin_attempt("run-1", "financing").unwrap(), 2);
    }

    #[test]
    fn test_second_put_conflicts_and_keeps_first_result() {
        let store = Store::in_memory().unwrap();
        store.upsert_record(&PropertyRecord::new("R1")).unwrap();

        let writes = [RecordWrite::IncrementUsage {
            owner_id: "u1".to_string(),
            kind: UsageKind::Enrichments,
        }];

        let first = store
            .put_step("run-1", "count-usage", &json!(1), &writes)
            .unwrap();
        let second = store
            .put_step("run-1", "count-usage", &json!(2), &writes)
            .unwrap();

        assert!(first.is_committed());
        match second {
            MemoPut::Conflict(existing) => assert_eq!(existing.result, Some(json!(1))),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(store.usage("u1", UsageKind::Enrichments).unwrap(), 1);
    }

    #[test]
    fn test_failed_write_rolls_back_memo() {
        let store = Store::in_memory().unwrap();

        let writes = [RecordWrite::Claim {
            record_id: "ghost".to_string(),
        }];
        assert!(store.put_step("run-1", "claim", &json!(null), &writes).is_err());
        assert!(store.get_step("run-1", "claim").unwrap().is_none());
    }

    #[test]
    fn test_failed_status_is_recorded() {
        let store = Store::in_memory().unwrap();
        store.begin_attempt("run-1", "financing").unwrap();
        store
            .record_step_error("run-1", "financing", "No price", StepStatus::Failed)
            .unwrap();

        let record = store.get_step("run-1", "financing").unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("No price"));
        assert_eq!(store.list_steps("run-1").unwrap().len(), 1);
    }
}
