//! Realty listing provider (RapidAPI "realty-in-us", v3 endpoints).

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{http_client, AdapterError, PropertySource};
use crate::domain::{ListingDetail, SoldComparable};

const SERVICE: &str = "realty";

/// HTTP client for the property-detail provider
pub struct RealtyClient {
    base_url: String,

    /// Value of the X-RapidAPI-Host header
    host: String,

    /// HOUSE_DATA_API_KEY; calls fail permanently without it
    api_key: Option<String>,

    client: reqwest::Client,
}

impl RealtyClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let host = reqwest::Url::parse(&base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| base_url.clone());

        Ok(Self {
            base_url,
            host,
            api_key,
            client: http_client(timeout)?,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AdapterError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::permanent(SERVICE, "HOUSE_DATA_API_KEY is not set"))?;

        let response = request
            .header("X-RapidAPI-Key", api_key)
            .header("X-RapidAPI-Host", &self.host)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(SERVICE, status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))
    }
}

#[async_trait]
impl PropertySource for RealtyClient {
    fn name(&self) -> &str {
        SERVICE
    }

    #[instrument(skip(self))]
    async fn listing_detail(&self, lookup_id: &str) -> Result<ListingDetail, AdapterError> {
        let request = self
            .client
            .get(format!("{}/properties/v3/detail", self.base_url))
            .query(&[("property_id", lookup_id)]);

        let response: DetailResponse = self.send(request).await?;
        let listing = response.into_listing(lookup_id)?;
        debug!(price = ?listing.price, "Fetched listing detail");
        Ok(listing)
    }

    #[instrument(skip(self))]
    async fn recently_sold(
        &self,
        zip_code: &str,
        limit: u32,
    ) -> Result<Vec<SoldComparable>, AdapterError> {
        let request = self
            .client
            .post(format!("{}/properties/v3/list", self.base_url))
            .json(&json!({
                "limit": limit,
                "offset": 0,
                "postal_code": zip_code,
                "status": ["sold"],
                "sort": {"direction": "desc", "field": "list_date"},
            }));

        let response: SoldResponse = self.send(request).await?;
        let sold = response.into_comparables();
        debug!(count = sold.len(), "Fetched recently sold listings");
        Ok(sold)
    }
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    data: Option<DetailData>,
}

#[derive(Debug, Deserialize)]
struct DetailData {
    home: Option<Home>,
}

#[derive(Debug, Deserialize)]
struct Home {
    list_price: Option<f64>,
    price_per_sqft: Option<f64>,
    status: Option<String>,
    #[serde(default)]
    description: Description,
    #[serde(default)]
    location: Location,
    details: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Description {
    beds: Option<f64>,
    baths: Option<f64>,
    garage: Option<f64>,
    stories: Option<f64>,
    sqft: Option<f64>,
    lot_sqft: Option<f64>,
    year_built: Option<i32>,
    styles: Option<Value>,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Location {
    #[serde(default)]
    address: Address,
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    line: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    coordinate: Option<Coordinate>,
}

#[derive(Debug, Deserialize)]
struct Coordinate {
    lat: Option<f64>,
    lon: Option<f64>,
}

impl DetailResponse {
    fn into_listing(self, lookup_id: &str) -> Result<ListingDetail, AdapterError> {
        let home = self
            .data
            .and_then(|data| data.home)
            .ok_or_else(|| AdapterError::permanent(SERVICE, format!("listing {} not found", lookup_id)))?;

        let address = home.location.address;
        let coordinate = address.coordinate;
        let description = home.description;

        Ok(ListingDetail {
            st_address: address.line,
            city: address.city,
            state: address.state,
            zip_code: address.postal_code,
            lat: coordinate.as_ref().and_then(|c| c.lat),
            lon: coordinate.as_ref().and_then(|c| c.lon),
            price: home.list_price,
            price_per_sqft: home.price_per_sqft,
            sqft: description.sqft,
            lot_sqft: description.lot_sqft,
            beds: count(description.beds),
            baths: description.baths,
            garage: count(description.garage),
            stories: count(description.stories),
            year_built: description.year_built,
            status: home.status,
            description: description.text,
            details: home.details,
            styles: description.styles,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SoldResponse {
    data: Option<SoldData>,
}

#[derive(Debug, Deserialize)]
struct SoldData {
    home_search: Option<HomeSearch>,
}

#[derive(Debug, Deserialize)]
struct HomeSearch {
    #[serde(default)]
    results: Vec<SoldListing>,
}

#[derive(Debug, Deserialize)]
struct SoldListing {
    last_sold_price: Option<f64>,
    last_sold_date: Option<String>,
    #[serde(default)]
    description: Description,
    #[serde(default)]
    location: Location,
}

impl SoldResponse {
    fn into_comparables(self) -> Vec<SoldComparable> {
        let results = self
            .data
            .and_then(|data| data.home_search)
            .map(|search| search.results)
            .unwrap_or_default();

        results
            .into_iter()
            .map(|listing| {
                let sqft = listing.description.sqft;
                let price_per_sqft = match (listing.last_sold_price, sqft) {
                    (Some(price), Some(area)) if area > 0.0 => {
                        Some((price / area * 100.0).round() / 100.0)
                    }
                    _ => None,
                };

                SoldComparable {
                    sold_price: listing.last_sold_price,
                    sold_date: listing.last_sold_date,
                    beds: count(listing.description.beds),
                    baths: listing.description.baths,
                    lot_sqft: listing.description.lot_sqft,
                    sqft,
                    price_per_sqft,
                    st_address: listing.location.address.line,
                }
            })
            .collect()
    }
}

/// Providers report room and floor counts as JSON numbers of either kind
fn count(value: Option<f64>) -> Option<u32> {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_FIXTURE: &str = r#"{
        "data": {
            "home": {
                "list_price": 415000,
                "price_per_sqft": 230,
                "status": "for_sale",
                "description": {
                    "beds": 3, "baths": 2.5, "garage": 2, "stories": 2,
                    "sqft": 1800, "lot_sqft": 6000, "year_built": 1994,
                    "styles": ["colonial"], "text": "Bright corner lot."
                },
                "location": {
                    "address": {
                        "line": "12 Elm St", "city": "Media", "state": "PA",
                        "postal_code": "19063",
                        "coordinate": {"lat": 39.91, "lon": -75.38}
                    }
                },
                "details": [{"category": "Heating", "text": ["Forced air"]}]
            }
        }
    }"#;

    #[test]
    fn test_detail_response_maps_to_listing() {
        let response: DetailResponse = serde_json::from_str(DETAIL_FIXTURE).unwrap();
        let listing = response.into_listing("L1").unwrap();

        assert_eq!(listing.price, Some(415000.0));
        assert_eq!(listing.lat, Some(39.91));
        assert_eq!(listing.zip_code.as_deref(), Some("19063"));
        assert_eq!(listing.beds, Some(3));
        assert_eq!(listing.baths, Some(2.5));
        assert_eq!(listing.year_built, Some(1994));
        assert_eq!(listing.description.as_deref(), Some("Bright corner lot."));
        assert!(listing.details.is_some());
    }

    #[test]
    fn test_detail_without_price_is_not_an_error() {
        let response: DetailResponse =
            serde_json::from_str(r#"{"data": {"home": {"list_price": null}}}"#).unwrap();
        let listing = response.into_listing("L1").unwrap();
        assert_eq!(listing.price, None);
        assert_eq!(listing.lat, None);
    }

    #[test]
    fn test_missing_home_is_permanent() {
        let response: DetailResponse = serde_json::from_str(r#"{"data": {"home": null}}"#).unwrap();
        let err = response.into_listing("L404").unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("L404"));
    }

    #[test]
    fn test_sold_response_is_minimized() {
        let json = r#"{
            "data": {"home_search": {"results": [
                {
                    "last_sold_price": 300000, "last_sold_date": "2024-05-01",
                    "description": {"beds": 3, "baths": 2, "sqft": 1500, "lot_sqft": 5000},
                    "location": {"address": {"line": "1 Oak Ave"}}
                },
                {"last_sold_price": 250000, "description": {"sqft": 0}}
            ]}}
        }"#;

        let response: SoldResponse = serde_json::from_str(json).unwrap();
        let sold = response.into_comparables();

        assert_eq!(sold.len(), 2);
        assert_eq!(sold[0].price_per_sqft, Some(200.0));
        assert_eq!(sold[0].st_address.as_deref(), Some("1 Oak Ave"));
        assert_eq!(sold[1].price_per_sqft, None);
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_permanently() {
        let client =
            RealtyClient::new("https://realty-in-us.p.rapidapi.com", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.host, "realty-in-us.p.rapidapi.com");

        let err = client.listing_detail("L1").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
