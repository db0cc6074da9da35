//! Shared fixtures for integration tests.
//!
//! Fake providers count their calls so tests can assert on external side
//! effects, and the harness wires them into a real store, executor and
//! dispatcher.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use hearth::adapters::{AdapterError, Adapters, PlacesSource, PropertySource};
use hearth::config::EnrichmentSettings;
use hearth::core::{Dispatcher, Executor, Registry, RetryPolicy, Store};
use hearth::domain::{Event, ListingDetail, NearbyPlace, PropertyRecord, Run, SoldComparable};
use hearth::workflows;

/// Retry policy with millisecond backoff
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

/// Property provider returning a fixed listing
#[derive(Default)]
pub struct FakeProperty {
    pub listing: ListingDetail,
    pub sold: Vec<SoldComparable>,
    pub detail_calls: AtomicUsize,
    pub sold_calls: AtomicUsize,
}

impl FakeProperty {
    pub fn with_listing(listing: ListingDetail) -> Self {
        Self {
            listing,
            ..Default::default()
        }
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn sold_calls(&self) -> usize {
        self.sold_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PropertySource for FakeProperty {
    fn name(&self) -> &str {
        "fake-realty"
    }

    async fn listing_detail(&self, _lookup_id: &str) -> Result<ListingDetail, AdapterError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.listing.clone())
    }

    async fn recently_sold(
        &self,
        _zip_code: &str,
        limit: u32,
    ) -> Result<Vec<SoldComparable>, AdapterError> {
        self.sold_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.sold.iter().take(limit as usize).cloned().collect())
    }
}

/// Places provider that can fail on demand
pub struct FakePlaces {
    pub places: Vec<NearbyPlace>,
    pub calls: AtomicUsize,

    /// Remaining calls that fail with a transient error
    transient_failures: AtomicUsize,

    /// Every call fails with a permanent error
    reject: bool,
}

impl Default for FakePlaces {
    fn default() -> Self {
        Self {
            places: vec![NearbyPlace {
                display_name: Some("Rose Tree Park".to_string()),
                lat: Some(39.93),
                lon: Some(-75.39),
                types: vec!["park".to_string()],
                ..Default::default()
            }],
            calls: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            reject: false,
        }
    }
}

impl FakePlaces {
    /// Fail the first `n` calls with a 503
    pub fn flaky(n: usize) -> Self {
        Self {
            transient_failures: AtomicUsize::new(n),
            ..Default::default()
        }
    }

    /// Fail every call with a 403
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlacesSource for FakePlaces {
    fn name(&self) -> &str {
        "fake-places"
    }

    async fn nearby(&self, _lat: f64, _lon: f64) -> Result<Vec<NearbyPlace>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.reject {
            return Err(AdapterError::permanent("fake-places", "HTTP 403 Forbidden"));
        }

        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AdapterError::transient("fake-places", "HTTP 503 Service Unavailable"));
        }

        Ok(self.places.clone())
    }
}

/// Store, fakes, executor and dispatcher wired together
pub struct Harness {
    pub store: Arc<Store>,
    pub property: Arc<FakeProperty>,
    pub places: Arc<FakePlaces>,
    pub executor: Arc<Executor>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(
            FakeProperty::default(),
            FakePlaces::default(),
            EnrichmentSettings::default(),
            fast_retry(),
        )
    }

    pub fn build(
        property: FakeProperty,
        places: FakePlaces,
        enrichment: EnrichmentSettings,
        retry: RetryPolicy,
    ) -> Self {
        let property = Arc::new(property);
        let places = Arc::new(places);
        let adapters = Adapters {
            property: property.clone(),
            places: places.clone(),
        };

        Self::with_registry(
            workflows::registry(&adapters, &enrichment),
            retry,
            property,
            places,
        )
    }

    /// Harness around a custom registry
    pub fn with_registry(
        registry: Registry,
        retry: RetryPolicy,
        property: Arc<FakeProperty>,
        places: Arc<FakePlaces>,
    ) -> Self {
        let store = Arc::new(Store::in_memory().unwrap());
        let executor = Arc::new(Executor::new(store.clone(), Arc::new(registry), retry));
        let dispatcher = Arc::new(Dispatcher::start(executor.clone(), 4));

        Self {
            store,
            property,
            places,
            executor,
            dispatcher,
        }
    }

    /// Submit an event and wait for its run to settle
    pub async fn run(&self, event: Event) -> Run {
        let handle = self.dispatcher.submit(event).unwrap();
        let run_id = handle.run_id().to_string();
        handle.wait().await.unwrap();
        self.store.get_run(&run_id).unwrap().unwrap()
    }
}

/// Insert a record with location and price
pub fn seed_record(store: &Store, id: &str, owner: &str, lat: f64, lon: f64, price: f64) {
    store
        .upsert_record(
            &PropertyRecord::new(id)
                .with_owner(owner)
                .with_location(lat, lon)
                .with_price(price),
        )
        .unwrap();
}
