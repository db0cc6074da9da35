//! Steps of the enrich-record workflow.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::load_record;
use crate::adapters::{finance, PlacesSource, PropertySource};
use crate::core::{Step, StepContext, StepError, StepOutput};
use crate::domain::{fields, RecordWrite};

pub const FETCH_DETAILS: &str = "fetch-details";
pub const FINANCING: &str = "financing";
pub const NEARBY_PLACES: &str = "nearby-places";
pub const RECENTLY_SOLD: &str = "recently-sold";

/// What later enrichment steps need to know about the listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSummary {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub price: Option<f64>,
    pub st_address: Option<String>,
    pub zip_code: Option<String>,
}

/// Resolve the listing: from the provider when the event names a listing,
/// otherwise from the stored record.
pub struct FetchDetails {
    source: Arc<dyn PropertySource>,
}

impl FetchDetails {
    pub fn new(source: Arc<dyn PropertySource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Step for FetchDetails {
    fn name(&self) -> &str {
        FETCH_DETAILS
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let record_id = ctx.require(fields::RECORD_ID)?;

        let Some(lookup_id) = ctx.event.field(fields::LOOKUP_ID) else {
            // Found by a listing scan; the record already holds the basics
            let record = load_record(ctx)?;
            debug!(%record_id, "Using stored listing data");
            return StepOutput::new(&ListingSummary {
                lat: record.lat,
                lon: record.lon,
                price: record.price,
                st_address: record.st_address,
                zip_code: record.zip_code,
            });
        };

        let listing = self.source.listing_detail(&lookup_id).await?;
        info!(%record_id, %lookup_id, source = self.source.name(), "Fetched listing detail");

        let summary = ListingSummary {
            lat: listing.lat,
            lon: listing.lon,
            price: listing.price,
            st_address: listing.st_address.clone(),
            zip_code: listing.zip_code.clone(),
        };

        Ok(StepOutput::new(&summary)?
            .with_write(RecordWrite::UpsertListing {
                record_id: record_id.clone(),
                owner_id: ctx.event.field(fields::OWNER_ID),
                lookup_id: Some(lookup_id),
                listing,
            })
            .with_write(RecordWrite::Claim { record_id }))
    }
}

/// Conventional and FHA projections at the configured rate
pub struct ComputeFinancing {
    interest_rate: f64,
}

impl ComputeFinancing {
    pub fn new(interest_rate: f64) -> Self {
        Self { interest_rate }
    }
}

#[async_trait]
impl Step for ComputeFinancing {
    fn name(&self) -> &str {
        FINANCING
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let record_id = ctx.require(fields::RECORD_ID)?;
        let summary: ListingSummary = ctx.output(FETCH_DETAILS)?;

        let price = summary.price.ok_or_else(|| {
            StepError::Permanent("No price was found, cannot compute financing".to_string())
        })?;

        let financing = finance::financing(price, self.interest_rate)?;
        debug!(
            %record_id,
            conventional = financing.conventional_loan.total_monthly_payment,
            fha = financing.fha_loan.total_monthly_payment,
            "Computed financing"
        );

        Ok(StepOutput::new(&json!({
            "price": price,
            "interestRate": self.interest_rate,
            "conventionalMonthly": financing.conventional_loan.total_monthly_payment,
            "fhaMonthly": financing.fha_loan.total_monthly_payment,
        }))?
        .with_write(RecordWrite::SetFinancing {
            record_id,
            financing,
        }))
    }
}

/// Points of interest around the listing
pub struct FetchNearbyPlaces {
    source: Arc<dyn PlacesSource>,
}

impl FetchNearbyPlaces {
    pub fn new(source: Arc<dyn PlacesSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Step for FetchNearbyPlaces {
    fn name(&self) -> &str {
        NEARBY_PLACES
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let record_id = ctx.require(fields::RECORD_ID)?;
        let summary: ListingSummary = ctx.output(FETCH_DETAILS)?;

        let (Some(lat), Some(lon)) = (summary.lat, summary.lon) else {
            return Err(StepError::Permanent(
                "No coordinates were found, cannot search nearby places".to_string(),
            ));
        };

        let places = self.source.nearby(lat, lon).await?;
        info!(%record_id, count = places.len(), source = self.source.name(), "Fetched nearby places");

        Ok(StepOutput::new(&json!({ "count": places.len() }))?
            .with_write(RecordWrite::SetNearbyPlaces { record_id, places }))
    }
}

/// Recently sold comparables in the listing's postal code
pub struct FetchRecentlySold {
    source: Arc<dyn PropertySource>,
    limit: u32,
}

impl FetchRecentlySold {
    pub fn new(source: Arc<dyn PropertySource>, limit: u32) -> Self {
        Self { source, limit }
    }
}

#[async_trait]
impl Step for FetchRecentlySold {
    fn name(&self) -> &str {
        RECENTLY_SOLD
    }

    async fn execute(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
        let record_id = ctx.require(fields::RECORD_ID)?;
        let summary: ListingSummary = ctx.output(FETCH_DETAILS)?;

        let Some(zip_code) = summary.zip_code else {
            info!(%record_id, "No postal code, skipping recently sold lookup");
            return StepOutput::new(&json!({ "count": 0, "skipped": true }));
        };

        let sold = self.source.recently_sold(&zip_code, self.limit).await?;
        info!(%record_id, %zip_code, count = sold.len(), "Fetched recently sold listings");

        Ok(StepOutput::new(&json!({ "count": sold.len() }))?
            .with_write(RecordWrite::SetRecentlySold { record_id, sold }))
    }
}
