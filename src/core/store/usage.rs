//! Usage counters.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::memo::UnknownValue;
use super::{conversion_error, Store};
use crate::domain::{UsageCounter, UsageKind};

impl Store {
    /// Add one to a counter outside any workflow and return its new value
    pub fn increment_usage(&self, owner_id: &str, kind: UsageKind) -> Result<u64> {
        let conn = self.conn()?;
        increment_in(&conn, owner_id, kind, Utc::now())
    }

    /// Current value of one counter (0 if never incremented)
    pub fn usage(&self, owner_id: &str, kind: UsageKind) -> Result<u64> {
        let conn = self.conn()?;

        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM usage_counters WHERE owner_id = ?1 AND kind = ?2",
                params![owner_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read {} usage of {}", kind, owner_id))?;

        Ok(count.map(to_count).unwrap_or(0))
    }

    /// Every counter of an owner
    pub fn usage_counters(&self, owner_id: &str) -> Result<Vec<UsageCounter>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT owner_id, kind, count FROM usage_counters WHERE owner_id = ?1 ORDER BY kind",
        )?;

        let counters = stmt
            .query_map(params![owner_id], |row| {
                let kind: String = row.get("kind")?;
                let count: i64 = row.get("count")?;
                Ok(UsageCounter {
                    owner_id: row.get("owner_id")?,
                    kind: UsageKind::parse(&kind).ok_or_else(|| {
                        conversion_error(row, "kind", UnknownValue(kind.clone()))
                    })?,
                    count: to_count(count),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read usage of {}", owner_id))?;

        Ok(counters)
    }
}

/// Atomic upsert-and-increment; the counter row is created on first use
pub(super) fn increment_in(
    conn: &Connection,
    owner_id: &str,
    kind: UsageKind,
    now: DateTime<Utc>,
) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "INSERT INTO usage_counters (owner_id, kind, count, updated_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT (owner_id, kind) DO UPDATE SET
                count = usage_counters.count + 1,
                updated_at = excluded.updated_at
             RETURNING count",
            params![owner_id, kind.as_str(), now.to_rfc3339()],
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to increment {} usage of {}", kind, owner_id))?;

    Ok(to_count(count))
}

fn to_count(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}
