use std::collections::HashMap;
use std::sync::Arc;

use nearby_core::{GeoPoint, Place, QueryError, ResultSource, Travel, TravelTimesRequest};
use nearby_storage::{origin_cache_key, CacheStore, TravelRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const WALK_KMH: f64 = 5.0;
const DRIVE_KMH: f64 = 30.0;
const MIN_DRIVE_MINUTES: f64 = 2.0;

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Straight-line walk / drive estimate. Driving never reports under two minutes.
pub fn estimate_travel(origin: &GeoPoint, destination: &GeoPoint) -> Travel {
    let km = origin.distance_km(destination);
    Travel {
        walk_min: round_tenth(km / WALK_KMH * 60.0),
        drive_min: round_tenth(km / DRIVE_KMH * 60.0).max(MIN_DRIVE_MINUTES),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelEstimate {
    pub place_id: String,
    pub walk_min: f64,
    pub drive_min: f64,
    pub distance_m: f64,
    pub source: ResultSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelTimesResponse {
    pub results: Vec<TravelEstimate>,
    pub source: ResultSource,
}

/// Cache-first travel estimates keyed by (origin, place id).
#[derive(Clone)]
pub struct TravelAnnotator {
    cache: Arc<dyn CacheStore>,
}

impl TravelAnnotator {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    async fn cached(&self, origin_key: &str, ids: &[String], force_refresh: bool) -> HashMap<String, Travel> {
        if force_refresh || ids.is_empty() {
            return HashMap::new();
        }
        match self.cache.get_travel(origin_key, ids).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "travel cache read failed; treating as miss");
                HashMap::new()
            }
        }
    }

    async fn store(&self, origin_key: &str, records: &[TravelRecord]) {
        if records.is_empty() {
            return;
        }
        if let Err(err) = self.cache.put_travel(origin_key, records).await {
            warn!(error = %err, count = records.len(), "travel cache write failed");
        }
    }

    /// Fills `distance_m` (always recomputed) and `travel` (cache or heuristic).
    pub async fn annotate(&self, places: &mut [Place], origin: GeoPoint, force_refresh: bool) {
        let origin_key = origin_cache_key(origin.lat, origin.lng);
        let ids: Vec<String> = places.iter().map(|p| p.place_id.clone()).collect();
        let hits = self.cached(&origin_key, &ids, force_refresh).await;

        let mut misses = Vec::new();
        for place in places.iter_mut() {
            place.distance_m = Some(origin.distance_m(&place.location));
            let travel = match hits.get(&place.place_id) {
                Some(travel) => *travel,
                None => {
                    let travel = estimate_travel(&origin, &place.location);
                    misses.push(TravelRecord {
                        place_id: place.place_id.clone(),
                        travel,
                    });
                    travel
                }
            };
            place.travel = Some(travel);
        }
        debug!(hits = hits.len(), misses = misses.len(), "travel annotated");
        self.store(&origin_key, &misses).await;
    }

    /// Standalone estimate for arbitrary destinations.
    pub async fn estimate(
        &self,
        request: &TravelTimesRequest,
        force_refresh: bool,
    ) -> Result<TravelTimesResponse, QueryError> {
        request.validate()?;
        let origin = request.origin;
        let origin_key = origin_cache_key(origin.lat, origin.lng);
        let ids: Vec<String> = request.destinations.iter().map(|d| d.place_id.clone()).collect();
        let hits = self.cached(&origin_key, &ids, force_refresh).await;

        let mut misses = Vec::new();
        let results: Vec<TravelEstimate> = request
            .destinations
            .iter()
            .map(|dest| {
                let point = GeoPoint::new(dest.lat, dest.lng);
                let (travel, source) = match hits.get(&dest.place_id) {
                    Some(travel) => (*travel, ResultSource::Cache),
                    None => {
                        let travel = estimate_travel(&origin, &point);
                        misses.push(TravelRecord {
                            place_id: dest.place_id.clone(),
                            travel,
                        });
                        (travel, ResultSource::Live)
                    }
                };
                TravelEstimate {
                    place_id: dest.place_id.clone(),
                    walk_min: travel.walk_min,
                    drive_min: travel.drive_min,
                    distance_m: origin.distance_m(&point),
                    source,
                }
            })
            .collect();

        self.store(&origin_key, &misses).await;
        let source = if results.iter().all(|r| r.source == ResultSource::Cache) {
            ResultSource::Cache
        } else {
            ResultSource::Live
        };
        Ok(TravelTimesResponse { results, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nearby_core::{Provider, TravelDestination};
    use nearby_storage::MemoryCacheStore;

    fn annotator() -> TravelAnnotator {
        TravelAnnotator::new(Arc::new(MemoryCacheStore::new(Duration::from_secs(60))))
    }

    #[test]
    fn heuristic_rounds_and_floors_drive_time() {
        let origin = GeoPoint::new(0.0, 0.0);
        assert_eq!(estimate_travel(&origin, &origin), Travel { walk_min: 0.0, drive_min: 2.0 });

        // one degree of latitude ~ 111.19 km
        let far = estimate_travel(&origin, &GeoPoint::new(1.0, 0.0));
        assert_eq!(far.walk_min, 1334.3);
        assert_eq!(far.drive_min, 222.4);
    }

    #[tokio::test]
    async fn annotate_writes_misses_then_serves_hits() {
        let annotator = annotator();
        let origin = GeoPoint::new(42.3314, -83.0458);
        let mut places =
            vec![Place::new(Provider::Osm, "node/1", "Astro", GeoPoint::new(42.3318, -83.0466)).unwrap()];

        annotator.annotate(&mut places, origin, false).await;
        let first = places[0].travel.expect("travel");
        assert!(places[0].distance_m.unwrap() > 0.0);

        let request = TravelTimesRequest {
            origin,
            destinations: vec![TravelDestination {
                place_id: "node/1".into(),
                lat: 42.3318,
                lng: -83.0466,
            }],
        };
        let response = annotator.estimate(&request, false).await.unwrap();
        assert_eq!(response.source, ResultSource::Cache);
        assert_eq!(response.results[0].walk_min, first.walk_min);

        let refreshed = annotator.estimate(&request, true).await.unwrap();
        assert_eq!(refreshed.source, ResultSource::Live);
    }

    #[tokio::test]
    async fn mixed_hits_report_live_overall() {
        let annotator = annotator();
        let origin = GeoPoint::new(42.0, -83.0);
        let dest = |id: &str| TravelDestination {
            place_id: id.into(),
            lat: 42.01,
            lng: -83.0,
        };
        let first = TravelTimesRequest { origin, destinations: vec![dest("a")] };
        annotator.estimate(&first, false).await.unwrap();

        let both = TravelTimesRequest { origin, destinations: vec![dest("a"), dest("b")] };
        let response = annotator.estimate(&both, false).await.unwrap();
        assert_eq!(response.results[0].source, ResultSource::Cache);
        assert_eq!(response.results[1].source, ResultSource::Live);
        assert_eq!(response.source, ResultSource::Live);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let annotator = annotator();
        let empty = TravelTimesRequest { origin: GeoPoint::new(1.0, 1.0), destinations: vec![] };
        assert_eq!(annotator.estimate(&empty, false).await, Err(QueryError::EmptyDestinations));
    }
}
