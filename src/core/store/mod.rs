//! SQLite-backed durable store.
//!
//! One database holds the domain records, usage counters and generated
//! content log, plus the workflow bookkeeping: runs, per-step memo records
//! and the run journal. Keeping them in one database lets a step's record
//! mutations commit in the same transaction as its memo record.
//!
//! The connection sits behind a mutex; every operation holds it only for
//! the duration of its SQL, never across an await point.

mod memo;
mod records;
mod runs;
mod usage;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use serde::de::DeserializeOwned;

use crate::domain::RecordWrite;

pub use memo::MemoPut;
pub use records::ClaimOutcome;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id              TEXT PRIMARY KEY,
    owner_id        TEXT,
    lookup_id       TEXT,
    st_address      TEXT,
    city            TEXT,
    state           TEXT,
    zip_code        TEXT,
    lat             REAL,
    lon             REAL,
    price           REAL,
    price_per_sqft  REAL,
    sqft            REAL,
    lot_sqft        REAL,
    beds            INTEGER,
    baths           REAL,
    garage          INTEGER,
    stories         INTEGER,
    year_built      INTEGER,
    status          TEXT,
    description     TEXT,
    details         TEXT,
    styles          TEXT,
    nearby_places   TEXT,
    financing       TEXT,
    recently_sold   TEXT,
    claimed         INTEGER NOT NULL DEFAULT 0,
    claimed_at      TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS usage_counters (
    owner_id    TEXT NOT NULL,
    kind        TEXT NOT NULL,
    count       INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (owner_id, kind)
);

CREATE TABLE IF NOT EXISTS generations (
    id          TEXT PRIMARY KEY,
    record_id   TEXT NOT NULL,
    run_id      TEXT NOT NULL UNIQUE,
    prompt      TEXT NOT NULL,
    text        TEXT NOT NULL,
    model       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS generations_by_record ON generations (record_id);

CREATE TABLE IF NOT EXISTS runs (
    id            TEXT PRIMARY KEY,
    event_name    TEXT NOT NULL,
    event_data    TEXT NOT NULL,
    status        TEXT NOT NULL,
    error         TEXT,
    failed_step   TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    completed_at  TEXT
);
CREATE INDEX IF NOT EXISTS runs_by_status ON runs (status);

CREATE TABLE IF NOT EXISTS step_records (
    run_id      TEXT NOT NULL,
    step        TEXT NOT NULL,
    status      TEXT NOT NULL,
    result      TEXT,
    attempts    INTEGER NOT NULL DEFAULT 0,
    error       TEXT,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (run_id, step)
);

CREATE TABLE IF NOT EXISTS run_events (
    id           TEXT PRIMARY KEY,
    run_id       TEXT NOT NULL,
    step         TEXT,
    kind         TEXT NOT NULL,
    summary      TEXT NOT NULL,
    attempt      INTEGER,
    duration_ms  INTEGER,
    error        TEXT,
    timestamp    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS run_events_by_run ON run_events (run_id);
"#;

/// Durable store for records, counters, runs and step memos
pub struct Store {
    conn: Mutex<Connection>,

    /// Database file (None for in-memory stores)
    path: Option<PathBuf>,
}

impl Store {
    /// Open or create a database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // Readers proceed while a worker writes
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("Failed to enable WAL journal mode")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file backing this store
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Store connection mutex poisoned"))
    }
}

/// Apply one step-produced mutation inside an open transaction
fn apply_write(conn: &Connection, write: &RecordWrite, now: DateTime<Utc>) -> Result<()> {
    match write {
        RecordWrite::UpsertListing {
            record_id,
            owner_id,
            lookup_id,
            listing,
        } => records::upsert_listing(
            conn,
            record_id,
            owner_id.as_deref(),
            lookup_id.as_deref(),
            listing,
            now,
        ),
        RecordWrite::SetFinancing {
            record_id,
            financing,
        } => records::set_json_column(conn, record_id, records::JsonColumn::Financing, financing),
        RecordWrite::SetNearbyPlaces { record_id, places } => {
            records::set_json_column(conn, record_id, records::JsonColumn::NearbyPlaces, places)
        }
        RecordWrite::SetRecentlySold { record_id, sold } => {
            records::set_json_column(conn, record_id, records::JsonColumn::RecentlySold, sold)
        }
        RecordWrite::Claim { record_id } => match records::claim_in(conn, record_id, now)? {
            ClaimOutcome::Claimed | ClaimOutcome::AlreadyClaimed => Ok(()),
            ClaimOutcome::NotFound => anyhow::bail!("Cannot claim missing record {}", record_id),
        },
        RecordWrite::IncrementUsage { owner_id, kind } => {
            usage::increment_in(conn, owner_id, *kind, now).map(|_| ())
        }
        RecordWrite::AppendGeneration(entry) => records::append_generation_in(conn, entry),
    }
}

/// Wrap a decoding failure of a named column
fn conversion_error(
    row: &Row<'_>,
    name: &str,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    let index = row.as_ref().column_index(name).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

/// Decode an optional JSON-encoded TEXT column
fn json_column<T: DeserializeOwned>(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(name)?;
    raw.map(|text| serde_json::from_str(&text).map_err(|e| conversion_error(row, name, e)))
        .transpose()
}

/// Decode an RFC 3339 timestamp column
fn timestamp_column(row: &Row<'_>, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(name)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(row, name, e))
}

fn optional_timestamp_column(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(name)?;
    raw.map(|text| parse_timestamp(&text).map_err(|e| conversion_error(row, name, e)))
        .transpose()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc))
}
