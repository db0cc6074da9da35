//! Property records and the enrichment payloads attached to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The business object being enriched: one property listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    pub id: String,
    pub owner_id: Option<String>,

    /// External listing identifier at the property-detail provider
    pub lookup_id: Option<String>,

    pub st_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,

    pub price: Option<f64>,
    pub price_per_sqft: Option<f64>,
    pub sqft: Option<f64>,
    pub lot_sqft: Option<f64>,
    pub beds: Option<u32>,
    pub baths: Option<f64>,
    pub garage: Option<u32>,
    pub stories: Option<u32>,
    pub year_built: Option<i32>,
    pub status: Option<String>,

    /// Structural description text
    pub description: Option<String>,
    pub details: Option<Value>,
    pub styles: Option<Value>,

    pub nearby_places: Option<Vec<NearbyPlace>>,
    pub financing: Option<Financing>,
    pub recently_sold: Option<Vec<SoldComparable>>,

    #[serde(default)]
    pub claimed: bool,
    pub claimed_at: Option<DateTime<Utc>>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PropertyRecord {
    /// A bare record with only an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: None,
            lookup_id: None,
            st_address: None,
            city: None,
            state: None,
            zip_code: None,
            lat: None,
            lon: None,
            price: None,
            price_per_sqft: None,
            sqft: None,
            lot_sqft: None,
            beds: None,
            baths: None,
            garage: None,
            stories: None,
            year_built: None,
            status: None,
            description: None,
            details: None,
            styles: None,
            nearby_places: None,
            financing: None,
            recently_sold: None,
            claimed: false,
            claimed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }
}

/// Listing detail as returned by the property-detail provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDetail {
    pub st_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub price: Option<f64>,
    pub price_per_sqft: Option<f64>,
    pub sqft: Option<f64>,
    pub lot_sqft: Option<f64>,
    pub beds: Option<u32>,
    pub baths: Option<f64>,
    pub garage: Option<u32>,
    pub stories: Option<u32>,
    pub year_built: Option<i32>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub details: Option<Value>,
    pub styles: Option<Value>,
}

/// A point of interest near a property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyPlace {
    pub display_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub types: Vec<String>,
    pub editorial_summary: Option<String>,
    pub good_for_children: Option<bool>,
    pub live_music: Option<bool>,
    pub good_for_watching_sports: Option<bool>,
}

/// A recently sold listing in the same postal code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoldComparable {
    pub sold_price: Option<f64>,
    pub sold_date: Option<String>,
    pub beds: Option<u32>,
    pub baths: Option<f64>,
    pub lot_sqft: Option<f64>,
    pub sqft: Option<f64>,
    pub price_per_sqft: Option<f64>,
    pub st_address: Option<String>,
}

/// Loan products a financing projection can be computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanType {
    Conventional,
    /// Government-backed (FHA)
    Fha,
}

/// Financing projections stored on a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Financing {
    pub conventional_loan: FinancingScenario,
    pub fha_loan: FinancingScenario,
}

/// Monthly payment breakdown and equity projection for one loan type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancingScenario {
    pub loan_type: LoanType,
    pub price: f64,
    pub interest_rate: f64,
    pub term_years: u32,
    pub down_payment: f64,
    pub loan_amount: f64,
    pub principal_and_interest: f64,
    pub mortgage_insurance: f64,
    pub property_tax: f64,
    pub home_insurance: f64,
    pub total_monthly_payment: f64,
    pub equity: Vec<EquityPoint>,
}

/// Projected equity at the end of a given year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub year: u32,
    pub home_value: f64,
    pub loan_balance: f64,
    pub equity: f64,
}

/// Append-only log entry for one generated text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub id: Uuid,
    pub record_id: String,

    /// Run that appended this entry (at most one entry per run)
    pub run_id: String,
    pub prompt: String,
    pub text: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_import_with_sparse_fields() {
        let json = r#"{"id": "R1", "ownerId": "u1", "lat": 40.0, "lon": -75.0, "price": 300000}"#;
        let record: PropertyRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.id, "R1");
        assert_eq!(record.owner_id.as_deref(), Some("u1"));
        assert_eq!(record.price, Some(300000.0));
        assert!(!record.claimed);
        assert!(record.financing.is_none());
    }

    #[test]
    fn test_builders() {
        let record = PropertyRecord::new("R2")
            .with_owner("u2")
            .with_location(40.0, -75.0)
            .with_price(250000.0);

        assert_eq!(record.lat, Some(40.0));
        assert_eq!(record.lon, Some(-75.0));
        assert_eq!(record.price, Some(250000.0));
    }
}
