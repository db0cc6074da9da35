//! Property records and the generated-content log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{conversion_error, json_column, optional_timestamp_column, timestamp_column, Store};
use crate::domain::{GeneratedContent, ListingDetail, PropertyRecord};

/// Result of a claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This call performed the 0→1 transition
    Claimed,

    /// The record was claimed earlier; nothing changed
    AlreadyClaimed,

    NotFound,
}

/// Record columns holding JSON-encoded enrichment payloads
#[derive(Debug, Clone, Copy)]
pub(super) enum JsonColumn {
    NearbyPlaces,
    Financing,
    RecentlySold,
}

impl JsonColumn {
    fn name(self) -> &'static str {
        match self {
            Self::NearbyPlaces => "nearby_places",
            Self::Financing => "financing",
            Self::RecentlySold => "recently_sold",
        }
    }
}

const RECORD_COLUMNS: &str = "id, owner_id, lookup_id, st_address, city, state, zip_code, \
    lat, lon, price, price_per_sqft, sqft, lot_sqft, beds, baths, garage, stories, year_built, \
    status, description, details, styles, nearby_places, financing, recently_sold, \
    claimed, claimed_at, created_at";

impl Store {
    /// Insert or fully replace a record (seeding and imports)
    pub fn upsert_record(&self, record: &PropertyRecord) -> Result<()> {
        let conn = self.conn()?;

        let details = to_json(&record.details)?;
        let styles = to_json(&record.styles)?;
        let nearby_places = to_json(&record.nearby_places)?;
        let financing = to_json(&record.financing)?;
        let recently_sold = to_json(&record.recently_sold)?;
        let claimed_at = record.claimed_at.map(|ts| ts.to_rfc3339());

        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO records ({RECORD_COLUMNS}) VALUES (
                    :id, :owner_id, :lookup_id, :st_address, :city, :state, :zip_code,
                    :lat, :lon, :price, :price_per_sqft, :sqft, :lot_sqft, :beds, :baths,
                    :garage, :stories, :year_built, :status, :description, :details, :styles,
                    :nearby_places, :financing, :recently_sold, :claimed, :claimed_at, :created_at
                )"
            ),
            named_params! {
                ":id": record.id,
                ":owner_id": record.owner_id,
                ":lookup_id": record.lookup_id,
                ":st_address": record.st_address,
                ":city": record.city,
                ":state": record.state,
                ":zip_code": record.zip_code,
                ":lat": record.lat,
                ":lon": record.lon,
                ":price": record.price,
                ":price_per_sqft": record.price_per_sqft,
                ":sqft": record.sqft,
                ":lot_sqft": record.lot_sqft,
                ":beds": record.beds,
                ":baths": record.baths,
                ":garage": record.garage,
                ":stories": record.stories,
                ":year_built": record.year_built,
                ":status": record.status,
                ":description": record.description,
                ":details": details,
                ":styles": styles,
                ":nearby_places": nearby_places,
                ":financing": financing,
                ":recently_sold": recently_sold,
                ":claimed": record.claimed,
                ":claimed_at": claimed_at,
                ":created_at": record.created_at.to_rfc3339(),
            },
        )
        .with_context(|| format!("Failed to write record {}", record.id))?;

        Ok(())
    }

    /// Load a record by id
    pub fn get_record(&self, id: &str) -> Result<Option<PropertyRecord>> {
        let conn = self.conn()?;

        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
            params![id],
            record_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to load record {}", id))
    }

    /// Flip a record's `claimed` flag 0→1 (compare-and-set)
    pub fn claim_record(&self, id: &str) -> Result<ClaimOutcome> {
        let conn = self.conn()?;
        claim_in(&conn, id, Utc::now())
    }

    /// Generated content entries for a record, oldest first
    pub fn generations_for_record(&self, record_id: &str) -> Result<Vec<GeneratedContent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, record_id, run_id, prompt, text, model, created_at
             FROM generations WHERE record_id = ?1 ORDER BY created_at, rowid",
        )?;

        let entries = stmt
            .query_map(params![record_id], |row| {
                let id: String = row.get("id")?;
                Ok(GeneratedContent {
                    id: id.parse().map_err(|e| conversion_error(row, "id", e))?,
                    record_id: row.get("record_id")?,
                    run_id: row.get("run_id")?,
                    prompt: row.get("prompt")?,
                    text: row.get("text")?,
                    model: row.get("model")?,
                    created_at: timestamp_column(row, "created_at")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("Failed to load generations for record {}", record_id))?;

        Ok(entries)
    }
}

/// Insert a record from provider listing data, or overwrite its listing fields.
/// Enrichment payloads and the claim flag are left untouched.
pub(super) fn upsert_listing(
    conn: &Connection,
    record_id: &str,
    owner_id: Option<&str>,
    lookup_id: Option<&str>,
    listing: &ListingDetail,
    now: DateTime<Utc>,
) -> Result<()> {
    let details = to_json(&listing.details)?;
    let styles = to_json(&listing.styles)?;

    conn.execute(
        "INSERT INTO records (
            id, owner_id, lookup_id, st_address, city, state, zip_code, lat, lon, price,
            price_per_sqft, sqft, lot_sqft, beds, baths, garage, stories, year_built, status,
            description, details, styles, created_at
        ) VALUES (
            :id, :owner_id, :lookup_id, :st_address, :city, :state, :zip_code, :lat, :lon, :price,
            :price_per_sqft, :sqft, :lot_sqft, :beds, :baths, :garage, :stories, :year_built, :status,
            :description, :details, :styles, :created_at
        )
        ON CONFLICT (id) DO UPDATE SET
            owner_id = COALESCE(excluded.owner_id, records.owner_id),
            lookup_id = COALESCE(excluded.lookup_id, records.lookup_id),
            st_address = excluded.st_address,
            city = excluded.city,
            state = excluded.state,
            zip_code = excluded.zip_code,
            lat = excluded.lat,
            lon = excluded.lon,
            price = excluded.price,
            price_per_sqft = excluded.price_per_sqft,
            sqft = excluded.sqft,
            lot_sqft = excluded.lot_sqft,
            beds = excluded.beds,
            baths = excluded.baths,
            garage = excluded.garage,
            stories = excluded.stories,
            year_built = excluded.year_built,
            status = excluded.status,
            description = excluded.description,
            details = excluded.details,
            styles = excluded.styles",
        named_params! {
            ":id": record_id,
            ":owner_id": owner_id,
            ":lookup_id": lookup_id,
            ":st_address": listing.st_address,
            ":city": listing.city,
            ":state": listing.state,
            ":zip_code": listing.zip_code,
            ":lat": listing.lat,
            ":lon": listing.lon,
            ":price": listing.price,
            ":price_per_sqft": listing.price_per_sqft,
            ":sqft": listing.sqft,
            ":lot_sqft": listing.lot_sqft,
            ":beds": listing.beds,
            ":baths": listing.baths,
            ":garage": listing.garage,
            ":stories": listing.stories,
            ":year_built": listing.year_built,
            ":status": listing.status,
            ":description": listing.description,
            ":details": details,
            ":styles": styles,
            ":created_at": now.to_rfc3339(),
        },
    )
    .with_context(|| format!("Failed to upsert listing for record {}", record_id))?;

    Ok(())
}

/// Overwrite one JSON payload column of an existing record
pub(super) fn set_json_column<T: Serialize>(
    conn: &Connection,
    record_id: &str,
    column: JsonColumn,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value).context("Failed to serialize record payload")?;

    let changed = conn
        .execute(
            &format!("UPDATE records SET {} = ?2 WHERE id = ?1", column.name()),
            params![record_id, json],
        )
        .with_context(|| format!("Failed to update {} of record {}", column.name(), record_id))?;

    if changed == 0 {
        anyhow::bail!("Record {} not found", record_id);
    }

    Ok(())
}

pub(super) fn claim_in(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<ClaimOutcome> {
    let changed = conn
        .execute(
            "UPDATE records SET claimed = 1, claimed_at = ?2 WHERE id = ?1 AND claimed = 0",
            params![id, now.to_rfc3339()],
        )
        .with_context(|| format!("Failed to claim record {}", id))?;

    if changed == 1 {
        return Ok(ClaimOutcome::Claimed);
    }

    let exists = conn
        .query_row("SELECT 1 FROM records WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some();

    Ok(if exists {
        ClaimOutcome::AlreadyClaimed
    } else {
        ClaimOutcome::NotFound
    })
}

pub(super) fn append_generation_in(conn: &Connection, entry: &GeneratedContent) -> Result<()> {
    conn.execute(
        "INSERT INTO generations (id, record_id, run_id, prompt, text, model, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id.to_string(),
            entry.record_id,
            entry.run_id,
            entry.prompt,
            entry.text,
            entry.model,
            entry.created_at.to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to append generation for record {}", entry.record_id))?;

    Ok(())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PropertyRecord> {
    Ok(PropertyRecord {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        lookup_id: row.get("lookup_id")?,
        st_address: row.get("st_address")?,
        city: row.get("city")?,
        state: row.get("state")?,
        zip_code: row.get("zip_code")?,
        lat: row.get("lat")?,
        lon: row.get("lon")?,
        price: row.get("price")?,
        price_per_sqft: row.get("price_per_sqft")?,
        sqft: row.get("sqft")?,
        lot_sqft: row.get("lot_sqft")?,
        beds: row.get("beds")?,
        baths: row.get("baths")?,
        garage: row.get("garage")?,
        stories: row.get("stories")?,
        year_built: row.get("year_built")?,
        status: row.get("status")?,
        description: row.get("description")?,
        details: json_column(row, "details")?,
        styles: json_column(row, "styles")?,
        nearby_places: json_column(row, "nearby_places")?,
        financing: json_column(row, "financing")?,
        recently_sold: json_column(row, "recently_sold")?,
        claimed: row.get("claimed")?,
        claimed_at: optional_timestamp_column(row, "claimed_at")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

fn to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize record payload")
}
