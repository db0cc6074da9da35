//! Adapter interfaces for external systems.
//!
//! Adapters wrap the third-party services a workflow reads from: the
//! property-detail provider and the nearby-places provider. Financing is a
//! local computation and lives in [`finance`]. Adapters make one call per
//! invocation and never retry; they classify failures so the executor can
//! decide.

pub mod finance;
pub mod places;
pub mod realty;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::{EnrichmentSettings, HttpSettings};
use crate::domain::{ListingDetail, NearbyPlace, SoldComparable};

pub use places::PlacesClient;
pub use realty::RealtyClient;

/// Classified adapter failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Network failure, timeout, 429 or 5xx
    #[error("{service} unavailable: {message}")]
    Transient { service: String, message: String },

    /// Rejected request, missing credentials or malformed response
    #[error("{service} request failed: {message}")]
    Permanent { service: String, message: String },
}

impl AdapterError {
    pub fn transient(service: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn permanent(service: &str, message: impl Into<String>) -> Self {
        Self::Permanent {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify a non-success HTTP status
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, truncate(body, 200))
        };

        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            Self::transient(service, message)
        } else {
            Self::permanent(service, message)
        }
    }

    /// Classify a transport-level failure
    pub fn from_reqwest(service: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::permanent(service, format!("malformed response: {}", err));
        }

        if let Some(status) = err.status() {
            return Self::from_status(service, status, "");
        }

        if err.is_builder() {
            Self::permanent(service, err.to_string())
        } else {
            // Timeouts, connection resets, DNS failures
            Self::transient(service, err.to_string())
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Property listing provider
#[async_trait]
pub trait PropertySource: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Full listing detail for a provider listing id
    async fn listing_detail(&self, lookup_id: &str) -> Result<ListingDetail, AdapterError>;

    /// Recently sold listings in a postal code, newest first
    async fn recently_sold(
        &self,
        zip_code: &str,
        limit: u32,
    ) -> Result<Vec<SoldComparable>, AdapterError>;
}

/// Points-of-interest provider
#[async_trait]
pub trait PlacesSource: Send + Sync {
    fn name(&self) -> &str;

    /// Places around a coordinate
    async fn nearby(&self, lat: f64, lon: f64) -> Result<Vec<NearbyPlace>, AdapterError>;
}

/// The adapter set workflows are built from
#[derive(Clone)]
pub struct Adapters {
    pub property: Arc<dyn PropertySource>,
    pub places: Arc<dyn PlacesSource>,
}

impl Adapters {
    /// Build the HTTP-backed adapters
    pub fn from_settings(http: &HttpSettings, enrichment: &EnrichmentSettings) -> Result<Self> {
        let timeout = Duration::from_secs(http.timeout_seconds);

        let property = RealtyClient::new(
            &http.realty_base_url,
            http.house_data_api_key.clone(),
            timeout,
        )?;
        let places = PlacesClient::new(
            &http.places_base_url,
            http.google_api_key.clone(),
            timeout,
        )?
        .with_search_area(enrichment.places_radius_m, enrichment.places_max_results);

        Ok(Self {
            property: Arc::new(property),
            places: Arc::new(places),
        })
    }
}

/// Shared reqwest client with a request timeout
fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("hearth/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        let cases = [
            (StatusCode::INTERNAL_SERVER_ERROR, true),
            (StatusCode::BAD_GATEWAY, true),
            (StatusCode::TOO_MANY_REQUESTS, true),
            (StatusCode::REQUEST_TIMEOUT, true),
            (StatusCode::NOT_FOUND, false),
            (StatusCode::UNAUTHORIZED, false),
            (StatusCode::BAD_REQUEST, false),
        ];

        for (status, transient) in cases {
            let err = AdapterError::from_status("realty", status, "");
            assert_eq!(err.is_transient(), transient, "{}", status);
        }
    }

    #[test]
    fn test_error_message_truncates_body() {
        let body = "x".repeat(1000);
        let err = AdapterError::from_status("places", StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().len() < 300);
        assert!(err.to_string().starts_with("places request failed: HTTP 400"));
    }

    #[tokio::test]
    async fn test_request_timeout_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept the connection and never answer
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let client = http_client(Duration::from_millis(200)).unwrap();
        let err = client
            .get(format!("http://{}/properties/v3/detail", addr))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let err = AdapterError::from_reqwest("realty", err);
        assert!(err.is_transient());
        server.abort();
    }
}
