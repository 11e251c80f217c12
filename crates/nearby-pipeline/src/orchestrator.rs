use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use nearby_adapters::{PlaceSearcher, SearchQuery};
use nearby_core::{CategoryBucket, Place, PlacesQuery, Provider, ResultSource};
use nearby_storage::{places_cache_key, CacheMetadata, CacheStore};
use tracing::{debug, info, warn};

use crate::availability::{apply_availability, filter_closing_soon, filter_open_now, Clock};
use crate::categories::pick_primary_category;
use crate::config::ProviderPlan;
use crate::filters::filter_places;
use crate::rank::rank_places;
use crate::travel::TravelAnnotator;

/// Result of one bucket's cache lookup or provider waterfall plus enrichment.
#[derive(Debug, Clone)]
pub struct BucketOutcome {
    pub bucket: CategoryBucket,
    pub places: Vec<Place>,
    pub source: ResultSource,
    pub providers: Vec<Provider>,
    pub duration_ms: u64,
}

impl BucketOutcome {
    pub fn empty(bucket: CategoryBucket) -> Self {
        Self {
            bucket,
            places: Vec::new(),
            source: ResultSource::Live,
            providers: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Accumulates places keyed by (provider, place id), keeping first-seen order.
#[derive(Debug, Default)]
struct Accumulator {
    seen: HashSet<(Provider, String)>,
    places: Vec<Place>,
}

impl Accumulator {
    fn extend(&mut self, incoming: Vec<Place>) -> usize {
        let before = self.places.len();
        for place in incoming {
            if self.seen.insert((place.provider, place.place_id.clone())) {
                self.places.push(place);
            }
        }
        self.places.len() - before
    }

    fn len(&self) -> usize {
        self.places.len()
    }
}

pub struct Orchestrator {
    searchers: HashMap<Provider, Arc<dyn PlaceSearcher>>,
    plan: ProviderPlan,
    cache: Arc<dyn CacheStore>,
    travel: TravelAnnotator,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        searchers: Vec<Arc<dyn PlaceSearcher>>,
        plan: ProviderPlan,
        cache: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let searchers = searchers.into_iter().map(|s| (s.provider(), s)).collect();
        Self {
            searchers,
            plan,
            travel: TravelAnnotator::new(cache.clone()),
            cache,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn travel(&self) -> &TravelAnnotator {
        &self.travel
    }

    pub fn registered_providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.searchers.keys().copied().collect();
        providers.sort();
        providers
    }

    /// Cache-first lookup, otherwise the threshold-gated provider waterfall,
    /// then the shared enrichment pipeline capped to the bucket's cap.
    pub async fn run_bucket(&self, query: &PlacesQuery, bucket: CategoryBucket) -> BucketOutcome {
        let started = Instant::now();
        let key = places_cache_key(query.lat, query.lng, query.radius_m, bucket.as_str(), query.open_now);

        let (raw, source, providers) = match self.cached(&key, query.force_refresh).await {
            Some((places, providers)) => (places, ResultSource::Cache, providers),
            None => {
                let (places, providers) = self.waterfall(query, bucket).await;
                let duration_ms = started.elapsed().as_millis() as u64;
                self.persist(&key, &places, &providers, duration_ms).await;
                (places, ResultSource::Live, providers)
            }
        };

        let places = self.enrich(raw, query, bucket).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            bucket = %bucket,
            source = ?source,
            count = places.len(),
            duration_ms,
            "bucket resolved"
        );
        BucketOutcome {
            bucket,
            places,
            source,
            providers,
            duration_ms,
        }
    }

    async fn cached(&self, key: &str, force_refresh: bool) -> Option<(Vec<Place>, Vec<Provider>)> {
        if force_refresh {
            return None;
        }
        match self.cache.get_places(key).await {
            Ok(Some(hit)) if !hit.places.is_empty() => {
                let places = hit
                    .places
                    .into_iter()
                    .map(|mut p| {
                        p.provider = Provider::Cache;
                        p
                    })
                    .collect();
                Some((places, hit.metadata.providers))
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "places cache read failed; treating as miss");
                None
            }
        }
    }

    async fn waterfall(&self, query: &PlacesQuery, bucket: CategoryBucket) -> (Vec<Place>, Vec<Provider>) {
        let threshold = bucket.threshold();
        let search = SearchQuery {
            origin: query.origin(),
            radius_m: query.radius_m,
            limit: bucket.cap(),
            bucket,
            categories: query.categories.clone(),
            open_now: query.open_now,
        };

        let mut acc = Accumulator::default();
        let mut used = Vec::new();
        for provider in self.plan.order_for(bucket) {
            if acc.len() >= threshold {
                break;
            }
            let Some(searcher) = self.searchers.get(provider) else {
                continue;
            };
            match searcher.search(&search).await {
                Ok(places) => {
                    let added = acc.extend(places);
                    used.push(*provider);
                    debug!(provider = %provider, bucket = %bucket, added, total = acc.len(), "provider merged");
                }
                Err(err) => {
                    warn!(provider = %provider, bucket = %bucket, error = %err, "provider failed; continuing");
                }
            }
        }
        (acc.places, used)
    }

    async fn persist(&self, key: &str, places: &[Place], providers: &[Provider], duration_ms: u64) {
        if places.is_empty() {
            return;
        }
        let metadata = CacheMetadata {
            providers: providers.to_vec(),
            count: places.len(),
            duration_ms,
        };
        if let Err(err) = self.cache.put_places(key, places, metadata).await {
            warn!(error = %err, "places cache write failed");
        }
    }

    /// Primary category, filters, availability, travel, rank, cap.
    pub async fn enrich(&self, places: Vec<Place>, query: &PlacesQuery, bucket: CategoryBucket) -> Vec<Place> {
        let mut places: Vec<Place> = places
            .into_iter()
            .map(|mut p| {
                let primary = pick_primary_category(&p.categories, Some(&p.name));
                p.set_primary_category(primary);
                p
            })
            .collect();

        places = filter_places(places);
        let now = self.clock.now();
        apply_availability(&mut places, now);
        if query.open_now == Some(true) {
            places = filter_open_now(places);
        }
        places = filter_closing_soon(places, now);
        self.travel
            .annotate(&mut places, query.origin(), query.force_refresh)
            .await;

        let mut places = rank_places(places);
        places.truncate(bucket.cap());
        places
    }
}
