//! Nearby places provider (Google Places API, searchNearby).

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{http_client, AdapterError, PlacesSource};
use crate::domain::NearbyPlace;

const SERVICE: &str = "places";

const FIELD_MASK: &str = "places.displayName,places.location,places.goodForChildren,\
places.liveMusic,places.goodForWatchingSports,places.editorialSummary,places.types";

/// HTTP client for the nearby-places provider
pub struct PlacesClient {
    base_url: String,
    api_key: Option<String>,
    radius_m: f64,
    max_results: u32,
    client: reqwest::Client,
}

impl PlacesClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            radius_m: 4000.0,
            max_results: 20,
            client: http_client(timeout)?,
        })
    }

    /// Search circle radius (meters) and result cap
    pub fn with_search_area(mut self, radius_m: f64, max_results: u32) -> Self {
        self.radius_m = radius_m;
        self.max_results = max_results;
        self
    }

    fn request_body(&self, lat: f64, lon: f64) -> SearchRequest {
        SearchRequest {
            included_types: Vec::new(),
            max_result_count: self.max_results,
            location_restriction: LocationRestriction {
                circle: Circle {
                    center: LatLng {
                        latitude: lat,
                        longitude: lon,
                    },
                    radius: self.radius_m,
                },
            },
        }
    }
}

#[async_trait]
impl PlacesSource for PlacesClient {
    fn name(&self) -> &str {
        SERVICE
    }

    #[instrument(skip(self))]
    async fn nearby(&self, lat: f64, lon: f64) -> Result<Vec<NearbyPlace>, AdapterError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::permanent(SERVICE, "GOOGLE_API_KEY is not set"))?;

        let response = self
            .client
            .post(format!("{}/v1/places:searchNearby", self.base_url))
            .header("X-Goog-FieldMask", FIELD_MASK)
            .header("X-Goog-Api-Key", api_key)
            .json(&self.request_body(lat, lon))
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_status(SERVICE, status, &body));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(SERVICE, e))?;

        let places: Vec<NearbyPlace> = body.places.into_iter().map(NearbyPlace::from).collect();
        debug!(count = places.len(), "Fetched nearby places");
        Ok(places)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    included_types: Vec<String>,
    max_result_count: u32,
    location_restriction: LocationRestriction,
}

#[derive(Debug, Serialize)]
struct LocationRestriction {
    circle: Circle,
}

#[derive(Debug, Serialize)]
struct Circle {
    center: LatLng,
    radius: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

/// An empty result omits `places` entirely
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    places: Vec<Place>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    display_name: Option<LocalizedText>,
    location: Option<LatLng>,
    #[serde(default)]
    types: Vec<String>,
    editorial_summary: Option<LocalizedText>,
    good_for_children: Option<bool>,
    live_music: Option<bool>,
    good_for_watching_sports: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct LocalizedText {
    text: Option<String>,
}

impl From<Place> for NearbyPlace {
    fn from(place: Place) -> Self {
        Self {
            display_name: place.display_name.and_then(|t| t.text),
            lat: place.location.as_ref().map(|l| l.latitude),
            lon: place.location.as_ref().map(|l| l.longitude),
            types: place.types,
            editorial_summary: place.editorial_summary.and_then(|t| t.text),
            good_for_children: place.good_for_children,
            live_music: place.live_music,
            good_for_watching_sports: place.good_for_watching_sports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let client = PlacesClient::new("https://places.googleapis.com/", None, Duration::from_secs(1))
            .unwrap()
            .with_search_area(2500.0, 5);

        let body = serde_json::to_value(client.request_body(40.0, -75.0)).unwrap();
        assert_eq!(
            body,
            json!({
                "includedTypes": [],
                "maxResultCount": 5,
                "locationRestriction": {
                    "circle": {
                        "center": {"latitude": 40.0, "longitude": -75.0},
                        "radius": 2500.0
                    }
                }
            })
        );
    }

    #[test]
    fn test_response_maps_to_places() {
        let json = r#"{
            "places": [{
                "displayName": {"text": "Rose Tree Park", "languageCode": "en"},
                "location": {"latitude": 39.93, "longitude": -75.39},
                "types": ["park", "point_of_interest"],
                "editorialSummary": {"text": "Sprawling park with trails."},
                "goodForChildren": true
            }]
        }"#;

        let body: SearchResponse = serde_json::from_str(json).unwrap();
        let places: Vec<NearbyPlace> = body.places.into_iter().map(NearbyPlace::from).collect();

        assert_eq!(places.len(), 1);
        assert_eq!(places[0].display_name.as_deref(), Some("Rose Tree Park"));
        assert_eq!(places[0].lat, Some(39.93));
        assert_eq!(places[0].good_for_children, Some(true));
        assert_eq!(places[0].live_music, None);
    }

    #[test]
    fn test_empty_response() {
        let body: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(body.places.is_empty());
    }
}
