//! Query pipeline: provider waterfall, normalization, filtering, ranking and merge.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nearby_adapters::{
    fixture_bundle_path, FixtureSearcher, FoursquareSearcher, OverpassSearcher, PlaceSearcher, YelpSearcher,
};
use nearby_core::Provider;
use nearby_storage::{
    CacheStore, FileCacheStore, HttpClientConfig, HttpFetcher, JsonlRequestLog, MemoryCacheStore, NoopRequestLog,
    RequestLog,
};
use tracing::{info, warn};

pub mod aggregator;
pub mod availability;
pub mod categories;
pub mod config;
pub mod dedup;
pub mod filters;
pub mod orchestrator;
pub mod rank;
pub mod travel;

pub use aggregator::{summarize_categories, Aggregator, BucketSummary, CategorySummary, PlacesResponse};
pub use availability::{Clock, FixedClock, SystemClock};
pub use config::{NearbyConfig, ProviderPlan};
pub use dedup::{FuzzyDedupConfig, FuzzyDeduplicator};
pub use orchestrator::{BucketOutcome, Orchestrator};
pub use travel::{estimate_travel, TravelEstimate, TravelTimesResponse};

pub const CRATE_NAME: &str = "nearby-pipeline";

fn cache_store(config: &NearbyConfig) -> Arc<dyn CacheStore> {
    match &config.cache_dir {
        Some(dir) => Arc::new(FileCacheStore::new(dir.clone(), config.cache_ttl)),
        None => Arc::new(MemoryCacheStore::new(config.cache_ttl)),
    }
}

fn request_log(config: &NearbyConfig) -> Arc<dyn RequestLog> {
    match &config.request_log_path {
        Some(path) => Arc::new(JsonlRequestLog::new(path.clone())),
        None => Arc::new(NoopRequestLog),
    }
}

fn assemble(config: &NearbyConfig, searchers: Vec<Arc<dyn PlaceSearcher>>) -> Result<Aggregator> {
    let plan = ProviderPlan::load(&config.providers_file)?;
    let providers: Vec<Provider> = searchers.iter().map(|s| s.provider()).collect();
    info!(?providers, "providers registered");
    for provider in &providers {
        if let Some(note) = plan.note_for(*provider) {
            info!(provider = %provider, note, "provider note");
        }
    }
    let orchestrator = Orchestrator::new(searchers, plan, cache_store(config), Arc::new(SystemClock));
    Ok(Aggregator::new(Arc::new(orchestrator), request_log(config)))
}

/// Wires live provider clients. Providers without credentials are left out.
pub fn build_aggregator(config: &NearbyConfig) -> Result<Aggregator> {
    let http = Arc::new(HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..Default::default()
    })?);

    let mut searchers: Vec<Arc<dyn PlaceSearcher>> =
        vec![Arc::new(OverpassSearcher::new(http.clone(), config.overpass_url.clone()))];
    match &config.foursquare_api_key {
        Some(key) => searchers.push(Arc::new(FoursquareSearcher::new(http.clone(), key.clone()))),
        None => warn!("FOURSQUARE_API_KEY not set; foursquare disabled"),
    }
    match &config.yelp_api_key {
        Some(key) => searchers.push(Arc::new(YelpSearcher::new(http.clone(), key.clone()))),
        None => warn!("YELP_API_KEY not set; yelp disabled"),
    }
    assemble(config, searchers)
}

/// Serves captured fixture bundles instead of calling providers.
pub fn build_offline_aggregator(config: &NearbyConfig, fixtures_root: &Path) -> Result<Aggregator> {
    let mut searchers: Vec<Arc<dyn PlaceSearcher>> = Vec::new();
    for provider in [Provider::Osm, Provider::Foursquare, Provider::Yelp] {
        if !fixture_bundle_path(fixtures_root, provider).exists() {
            continue;
        }
        searchers.push(Arc::new(FixtureSearcher::load(fixtures_root, provider)?));
    }
    if searchers.is_empty() {
        anyhow::bail!("no fixture bundles found under {}", fixtures_root.display());
    }
    assemble(config, searchers)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use nearby_adapters::{AdapterError, PlaceSearcher, SearchQuery};
    use nearby_core::{GeoPoint, Place, Provider, RequestLogEntry, Travel};
    use nearby_storage::{CacheMetadata, CacheStore, CachedPlaces, RequestLog, StorageError, TravelRecord};

    pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).single().unwrap()
    }

    pub fn place(provider: Provider, id: &str, name: &str, lat: f64, lng: f64, categories: &[&str]) -> Place {
        let mut place = Place::new(provider, id, name, GeoPoint::new(lat, lng)).unwrap();
        place.categories = categories.iter().map(|c| c.to_string()).collect();
        place
    }

    /// `count` distinct coffee shops spread north of (42.33, -83.04).
    pub fn coffee_shops(provider: Provider, prefix: &str, count: usize) -> Vec<Place> {
        (0..count)
            .map(|i| {
                place(
                    provider,
                    &format!("{prefix}-{i}"),
                    &format!("{prefix} Roasters {i}"),
                    42.33 + 0.002 * (i as f64 + 1.0),
                    -83.04,
                    &["coffee_shop"],
                )
            })
            .collect()
    }

    /// Returns a fixed list and counts how often it was asked.
    pub struct StaticSearcher {
        provider: Provider,
        places: Vec<Place>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StaticSearcher {
        pub fn new(provider: Provider, places: Vec<Place>) -> Self {
            Self {
                provider,
                places,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(provider: Provider) -> Self {
            Self {
                fail: true,
                ..Self::new(provider, Vec::new())
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlaceSearcher for StaticSearcher {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn search(&self, query: &SearchQuery) -> Result<Vec<Place>, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AdapterError::Message(format!("{} unavailable", self.provider)));
            }
            Ok(self.places.iter().take(query.limit).cloned().collect())
        }
    }

    /// Panics on every search, as a buggy provider client would.
    pub struct PanickingSearcher(pub Provider);

    #[async_trait]
    impl PlaceSearcher for PanickingSearcher {
        fn provider(&self) -> Provider {
            self.0
        }

        async fn search(&self, _query: &SearchQuery) -> Result<Vec<Place>, AdapterError> {
            panic!("{} client bug", self.0)
        }
    }

    fn backend_down() -> StorageError {
        StorageError::Backend("backend down".into())
    }

    /// Every read and write fails.
    #[derive(Debug, Default)]
    pub struct BrokenCacheStore {
        reads: AtomicUsize,
    }

    impl BrokenCacheStore {
        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CacheStore for BrokenCacheStore {
        async fn get_places(&self, _key: &str) -> Result<Option<CachedPlaces>, StorageError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(backend_down())
        }

        async fn put_places(&self, _key: &str, _places: &[Place], _metadata: CacheMetadata) -> Result<(), StorageError> {
            Err(backend_down())
        }

        async fn get_travel(&self, _origin_key: &str, _place_ids: &[String]) -> Result<HashMap<String, Travel>, StorageError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(backend_down())
        }

        async fn put_travel(&self, _origin_key: &str, _records: &[TravelRecord]) -> Result<(), StorageError> {
            Err(backend_down())
        }
    }

    /// Rejects every entry, counting attempts.
    #[derive(Debug, Default)]
    pub struct BrokenRequestLog {
        attempts: AtomicUsize,
    }

    impl BrokenRequestLog {
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RequestLog for BrokenRequestLog {
        async fn log_request(&self, _entry: &RequestLogEntry) -> Result<(), StorageError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(backend_down())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearby_core::{CategoryBucket, PlacesQuery, ResultSource};
    use std::path::PathBuf;

    fn fixtures_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
    }

    #[tokio::test]
    async fn offline_aggregator_serves_fixture_bundles() {
        let config = NearbyConfig {
            providers_file: PathBuf::from("/no/such/providers.yaml"),
            ..NearbyConfig::default()
        };
        let aggregator = build_offline_aggregator(&config, &fixtures_root()).unwrap();
        assert_eq!(
            aggregator.orchestrator().registered_providers(),
            vec![Provider::Osm, Provider::Foursquare, Provider::Yelp]
        );

        let query = PlacesQuery::new(42.3314, -83.0458, 2_000, vec!["coffee".into()]);
        let response = aggregator.search(query).await.unwrap();
        assert_eq!(response.source, ResultSource::Live);
        assert!(response.places.iter().all(|p| !p.name.to_lowercase().contains("shell")));
        assert!(response
            .buckets
            .iter()
            .any(|b| b.bucket == CategoryBucket::CoffeeWfh));
    }

    #[test]
    fn offline_aggregator_requires_some_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_offline_aggregator(&NearbyConfig::default(), dir.path()).err().unwrap();
        assert!(err.to_string().contains("no fixture bundles"));
    }

    #[test]
    fn live_aggregator_registers_only_keyed_providers() {
        let config = NearbyConfig {
            providers_file: PathBuf::from("/no/such/providers.yaml"),
            yelp_api_key: Some(secrecy::SecretString::new("yelp-key".into())),
            ..NearbyConfig::default()
        };
        let aggregator = build_aggregator(&config).unwrap();
        assert_eq!(
            aggregator.orchestrator().registered_providers(),
            vec![Provider::Osm, Provider::Yelp]
        );
    }
}
