use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use nearby_core::{
    bucket_catalogue, BucketInfo, CategoryBucket, Place, PlacesQuery, Provider, QueryError, RequestLogEntry,
    ResultSource, SubCategory, TravelTimesRequest,
};
use nearby_storage::RequestLog;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::availability::apply_availability;
use crate::categories::{pick_primary_category, resolve_buckets};
use crate::dedup::FuzzyDeduplicator;
use crate::orchestrator::{BucketOutcome, Orchestrator};
use crate::rank::rank_places;
use crate::travel::TravelTimesResponse;

/// Count of places per non-general bucket, for UI chips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub key: CategoryBucket,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub bucket: CategoryBucket,
    pub source: ResultSource,
    pub count: usize,
    pub providers: Vec<Provider>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacesResponse {
    pub request_id: String,
    pub places: Vec<Place>,
    pub categories: Vec<CategorySummary>,
    pub buckets: Vec<BucketSummary>,
    pub source: ResultSource,
    pub providers: Vec<Provider>,
    pub duration_ms: u64,
}

/// Entry point: fans out one orchestrator run per bucket and merges the results.
pub struct Aggregator {
    orchestrator: Arc<Orchestrator>,
    request_log: Arc<dyn RequestLog>,
    dedup: FuzzyDeduplicator,
}

impl Aggregator {
    pub fn new(orchestrator: Arc<Orchestrator>, request_log: Arc<dyn RequestLog>) -> Self {
        Self {
            orchestrator,
            request_log,
            dedup: FuzzyDeduplicator::default(),
        }
    }

    pub fn with_dedup(mut self, dedup: FuzzyDeduplicator) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn categories(&self) -> Vec<BucketInfo> {
        bucket_catalogue()
    }

    pub async fn travel_times(
        &self,
        request: &TravelTimesRequest,
        force_refresh: bool,
    ) -> Result<TravelTimesResponse, QueryError> {
        self.orchestrator.travel().estimate(request, force_refresh).await
    }

    pub async fn search(&self, query: PlacesQuery) -> Result<PlacesResponse, QueryError> {
        let started = Instant::now();
        let requested_at = Utc::now();
        let request_id = Uuid::new_v4().to_string();

        if let Err(err) = query.validate() {
            let entry = log_entry(&request_id, requested_at, &query, &[], None, started);
            self.write_log(RequestLogEntry {
                error_code: Some(err.code().to_string()),
                ..entry
            })
            .await;
            return Err(err);
        }

        let span = info_span!("places_search", request_id = %request_id);
        let response = self
            .run(request_id.clone(), query.clone(), started)
            .instrument(span)
            .await;

        let buckets: Vec<CategoryBucket> = response.buckets.iter().map(|b| b.bucket).collect();
        let entry = log_entry(&request_id, requested_at, &query, &buckets, Some(&response), started);
        self.write_log(entry).await;
        Ok(response)
    }

    async fn run(&self, request_id: String, query: PlacesQuery, started: Instant) -> PlacesResponse {
        let buckets = resolve_buckets(&query.categories);
        let query = Arc::new(query);

        let handles: Vec<_> = buckets
            .iter()
            .map(|&bucket| {
                let orchestrator = Arc::clone(&self.orchestrator);
                let query = Arc::clone(&query);
                let span = info_span!("bucket", bucket = %bucket);
                let handle = tokio::spawn(
                    async move { orchestrator.run_bucket(&query, bucket).await }.instrument(span),
                );
                (bucket, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (bucket, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    warn!(bucket = %bucket, error = %err, "bucket task failed; using empty result");
                    outcomes.push(BucketOutcome::empty(bucket));
                }
            }
        }

        let merged = self.merge(&outcomes);
        let deduped = self.dedup.apply(merged);
        let mut places = cap_per_bucket(rank_places(deduped));
        if let Some(limit) = query.limit {
            places.truncate(limit);
        }

        let source = if !outcomes.is_empty() && outcomes.iter().all(|o| o.source == ResultSource::Cache) {
            ResultSource::Cache
        } else {
            ResultSource::Live
        };
        let mut providers = Vec::new();
        for provider in outcomes.iter().flat_map(|o| o.providers.iter()) {
            if !providers.contains(provider) {
                providers.push(*provider);
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            request_id = %request_id,
            buckets = outcomes.len(),
            count = places.len(),
            source = ?source,
            duration_ms,
            "search complete"
        );

        PlacesResponse {
            request_id,
            categories: summarize_categories(&places),
            buckets: outcomes
                .iter()
                .map(|o| BucketSummary {
                    bucket: o.bucket,
                    source: o.source,
                    count: o.places.len(),
                    providers: o.providers.clone(),
                    duration_ms: o.duration_ms,
                })
                .collect(),
            places,
            source,
            providers,
            duration_ms,
        }
    }

    /// Union by place id, first occurrence wins. Repeats contribute their
    /// category tokens; the primary category is re-picked from the union.
    fn merge(&self, outcomes: &[BucketOutcome]) -> Vec<Place> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut merged: Vec<Place> = Vec::new();
        let mut changed = Vec::new();

        for place in outcomes.iter().flat_map(|o| o.places.iter()) {
            match index.get(&place.place_id).copied() {
                Some(at) => {
                    let kept = &mut merged[at];
                    let mut grew = false;
                    for token in &place.categories {
                        if !kept.categories.contains(token) {
                            kept.categories.push(token.clone());
                            grew = true;
                        }
                    }
                    if grew {
                        let primary = pick_primary_category(&kept.categories, Some(&kept.name));
                        if primary != kept.primary_category {
                            kept.set_primary_category(primary);
                            changed.push(at);
                        }
                    }
                }
                None => {
                    index.insert(place.place_id.clone(), merged.len());
                    merged.push(place.clone());
                }
            }
        }

        if !changed.is_empty() {
            let now = self.orchestrator.now();
            for at in changed {
                apply_availability(std::slice::from_mut(&mut merged[at]), now);
            }
        }
        merged
    }

    async fn write_log(&self, entry: RequestLogEntry) {
        if let Err(err) = self.request_log.log_request(&entry).await {
            warn!(request_id = %entry.request_id, error = %err, "request log write failed");
        }
    }
}

/// Keeps at most `cap` places per bucket, in the given order.
fn cap_per_bucket(places: Vec<Place>) -> Vec<Place> {
    let mut counts: HashMap<CategoryBucket, usize> = HashMap::new();
    places
        .into_iter()
        .filter(|p| {
            let count = counts.entry(p.category_bucket).or_default();
            *count += 1;
            *count <= p.category_bucket.cap()
        })
        .collect()
}

pub fn summarize_categories(places: &[Place]) -> Vec<CategorySummary> {
    let mut counts: BTreeMap<CategoryBucket, usize> = BTreeMap::new();
    for place in places.iter().filter(|p| p.category_bucket != CategoryBucket::General) {
        *counts.entry(place.category_bucket).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| CategorySummary {
            key,
            label: key.label().to_string(),
            count,
        })
        .collect()
}

fn log_entry(
    request_id: &str,
    requested_at: DateTime<Utc>,
    query: &PlacesQuery,
    buckets: &[CategoryBucket],
    response: Option<&PlacesResponse>,
    started: Instant,
) -> RequestLogEntry {
    let normalized: BTreeSet<SubCategory> = response
        .map(|r| r.places.iter().map(|p| p.primary_category).collect())
        .unwrap_or_default();
    RequestLogEntry {
        request_id: request_id.to_string(),
        requested_at,
        lat: query.lat,
        lng: query.lng,
        radius_m: query.radius_m,
        categories: query.categories.clone(),
        buckets: buckets.to_vec(),
        categories_normalized: normalized.into_iter().collect(),
        providers_used: response.map(|r| r.providers.clone()).unwrap_or_default(),
        cache_hit: response.is_some_and(|r| r.source == ResultSource::Cache),
        result_count: response.map_or(0, |r| r.places.len()),
        duration_ms: started.elapsed().as_millis() as u64,
        error_code: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use nearby_adapters::PlaceSearcher;
    use nearby_storage::{JsonlRequestLog, NoopCacheStore, NoopRequestLog};

    use crate::availability::FixedClock;
    use crate::config::ProviderPlan;
    use crate::test_support::{at, coffee_shops, place, BrokenRequestLog, PanickingSearcher, StaticSearcher};

    fn aggregator(searchers: Vec<Arc<dyn PlaceSearcher>>, log: Arc<dyn RequestLog>) -> Aggregator {
        let orchestrator = Orchestrator::new(
            searchers,
            ProviderPlan::default(),
            Arc::new(NoopCacheStore),
            Arc::new(FixedClock(at(10, 0))),
        );
        Aggregator::new(Arc::new(orchestrator), log)
    }

    fn outcome(bucket: CategoryBucket, places: Vec<Place>) -> BucketOutcome {
        BucketOutcome {
            places,
            ..BucketOutcome::empty(bucket)
        }
    }

    #[tokio::test]
    async fn multi_bucket_search_merges_caps_and_ranks() {
        let mut places = vec![place(Provider::Foursquare, "fsq-diner", "Checker Diner", 42.3301, -83.04, &["restaurant"])];
        places.extend(coffee_shops(Provider::Foursquare, "fsq", 25));
        let fsq: Arc<dyn PlaceSearcher> = Arc::new(StaticSearcher::new(Provider::Foursquare, places));
        let aggregator = aggregator(vec![fsq], Arc::new(NoopRequestLog));

        let query = PlacesQuery::new(42.33, -83.04, 3_000, vec!["coffee".into(), "food".into()]);
        let response = aggregator.search(query).await.unwrap();

        let ids: HashSet<&str> = response.places.iter().map(|p| p.place_id.as_str()).collect();
        assert_eq!(ids.len(), response.places.len());
        assert_eq!(response.places.len(), 21);

        let coffee = response
            .places
            .iter()
            .filter(|p| p.category_bucket == CategoryBucket::CoffeeWfh)
            .count();
        assert_eq!(coffee, CategoryBucket::CoffeeWfh.cap());

        let (last, rest) = response.places.split_last().unwrap();
        assert_eq!(last.place_id, "fsq-diner");
        assert_eq!(last.open_now, Some(false));
        assert!(rest.iter().all(|p| p.open_now == Some(true)));

        assert_eq!(response.source, ResultSource::Live);
        assert_eq!(response.providers, vec![Provider::Foursquare]);
        assert_eq!(response.buckets.len(), 2);
        assert!(response
            .categories
            .contains(&CategorySummary { key: CategoryBucket::FoodDrink, label: "Food & Drink".into(), count: 1 }));
    }

    #[tokio::test]
    async fn limit_truncates_after_ranking() {
        let fsq: Arc<dyn PlaceSearcher> = Arc::new(StaticSearcher::new(
            Provider::Foursquare,
            coffee_shops(Provider::Foursquare, "fsq", 12),
        ));
        let aggregator = aggregator(vec![fsq], Arc::new(NoopRequestLog));
        let query = PlacesQuery {
            limit: Some(5),
            ..PlacesQuery::new(42.33, -83.04, 3_000, vec!["coffee".into()])
        };
        let response = aggregator.search(query).await.unwrap();
        assert_eq!(response.places.len(), 5);
        assert_eq!(response.places[0].place_id, "fsq-0");
    }

    #[test]
    fn merge_unions_categories_and_repicks_primary() {
        let aggregator = aggregator(Vec::new(), Arc::new(NoopRequestLog));
        let mut as_food = place(Provider::Osm, "node/9", "Corner House", 42.33, -83.04, &["restaurant"]);
        as_food.set_primary_category(SubCategory::Restaurant);
        let mut as_coffee = place(Provider::Osm, "node/9", "Corner House", 42.33, -83.04, &["coffee_shop"]);
        as_coffee.set_primary_category(SubCategory::Coffee);

        let merged = aggregator.merge(&[
            outcome(CategoryBucket::FoodDrink, vec![as_food]),
            outcome(CategoryBucket::CoffeeWfh, vec![as_coffee]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].categories, vec!["restaurant", "coffee_shop"]);
        assert_eq!(merged[0].primary_category, SubCategory::Coffee);
        assert_eq!(merged[0].category_bucket, CategoryBucket::CoffeeWfh);
        assert_eq!(merged[0].open_now, Some(true));
    }

    #[tokio::test]
    async fn invalid_query_is_logged_with_error_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");
        let aggregator = aggregator(Vec::new(), Arc::new(JsonlRequestLog::new(path.clone())));

        let err = aggregator
            .search(PlacesQuery::new(91.0, 0.0, 1_000, vec!["coffee".into()]))
            .await
            .unwrap_err();
        assert_eq!(err, QueryError::InvalidLatitude);

        aggregator
            .search(PlacesQuery::new(42.0, -83.0, 1_000, vec!["park".into()]))
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let entries: Vec<RequestLogEntry> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].error_code.as_deref(), Some("invalid_lat"));
        assert_eq!(entries[1].error_code, None);
        assert_eq!(entries[1].buckets, vec![CategoryBucket::Outdoors]);
        assert!(!entries[1].cache_hit);
    }

    #[test]
    fn summary_skips_general_bucket() {
        let mut museum = place(Provider::Osm, "node/1", "DIA", 42.35, -83.06, &["museum"]);
        museum.set_primary_category(SubCategory::Arts);
        let plain = place(Provider::Osm, "node/2", "Thing", 42.35, -83.06, &[]);

        let summary = summarize_categories(&[museum, plain]);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].key, CategoryBucket::ArtsCulture);
        assert_eq!(summary[0].count, 1);
    }

    #[tokio::test]
    async fn coffee_bucket_with_overlapping_provider_ids() {
        // same ids from both providers, different names; every fifth OSM entry
        // is a restaurant, still closed at 10:00
        let fsq_places: Vec<Place> = coffee_shops(Provider::Foursquare, "x", 3)
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                p.name = format!("Cafe Number {i}");
                p
            })
            .collect();
        let osm_places: Vec<Place> = coffee_shops(Provider::Osm, "x", 25)
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                if i % 5 == 4 {
                    p.categories = vec!["restaurant".into()];
                }
                p
            })
            .collect();
        let fsq: Arc<dyn PlaceSearcher> = Arc::new(StaticSearcher::new(Provider::Foursquare, fsq_places));
        let osm: Arc<dyn PlaceSearcher> = Arc::new(StaticSearcher::new(Provider::Osm, osm_places));
        let aggregator = aggregator(vec![fsq, osm], Arc::new(NoopRequestLog));

        let response = aggregator
            .search(PlacesQuery::new(42.33, -83.04, 3_000, vec!["coffee_wfh".into()]))
            .await
            .unwrap();

        let ids: HashSet<&str> = response.places.iter().map(|p| p.place_id.as_str()).collect();
        assert_eq!(ids.len(), response.places.len());
        assert!(!response.places.is_empty());
        assert!(response.places.len() <= 20);
        assert_eq!(response.providers, vec![Provider::Foursquare, Provider::Osm]);

        let first_closed = response
            .places
            .iter()
            .position(|p| p.open_now == Some(false))
            .expect("some restaurants are closed");
        assert!(response.places[..first_closed].iter().all(|p| p.open_now == Some(true)));
        assert!(response.places[first_closed..].iter().all(|p| p.open_now == Some(false)));
    }

    #[tokio::test]
    async fn panicking_bucket_leaves_siblings_intact() {
        let fsq: Arc<dyn PlaceSearcher> = Arc::new(StaticSearcher::new(
            Provider::Foursquare,
            coffee_shops(Provider::Foursquare, "fsq", 10),
        ));
        let osm: Arc<dyn PlaceSearcher> = Arc::new(PanickingSearcher(Provider::Osm));
        let aggregator = aggregator(vec![fsq, osm], Arc::new(NoopRequestLog));

        let response = aggregator
            .search(PlacesQuery::new(42.33, -83.04, 3_000, vec!["coffee".into(), "park".into()]))
            .await
            .unwrap();

        let counts: Vec<(CategoryBucket, usize)> = response.buckets.iter().map(|b| (b.bucket, b.count)).collect();
        assert_eq!(counts, vec![(CategoryBucket::CoffeeWfh, 10), (CategoryBucket::Outdoors, 0)]);
        assert_eq!(response.places.len(), 10);
    }

    #[tokio::test]
    async fn request_log_failure_does_not_change_response() {
        let shops = coffee_shops(Provider::Foursquare, "fsq", 6);
        let query = PlacesQuery::new(42.33, -83.04, 3_000, vec!["coffee".into()]);

        let quiet = aggregator(
            vec![Arc::new(StaticSearcher::new(Provider::Foursquare, shops.clone())) as Arc<dyn PlaceSearcher>],
            Arc::new(NoopRequestLog),
        );
        let expected = quiet.search(query.clone()).await.unwrap();

        let log = Arc::new(BrokenRequestLog::default());
        let noisy = aggregator(
            vec![Arc::new(StaticSearcher::new(Provider::Foursquare, shops)) as Arc<dyn PlaceSearcher>],
            log.clone(),
        );
        let response = noisy.search(query).await.unwrap();
        assert_eq!(log.attempts(), 1);
        assert_eq!(response.places, expected.places);
        assert_eq!(response.source, expected.source);

        let err = noisy
            .search(PlacesQuery::new(42.33, -83.04, 0, vec!["coffee".into()]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_radius");
        assert_eq!(log.attempts(), 2);
    }
}
