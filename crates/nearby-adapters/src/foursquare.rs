use std::sync::Arc;

use async_trait::async_trait;
use nearby_core::{CategoryBucket, GeoPoint, Place, Provider};
use nearby_storage::{HttpFetcher, HttpRequest};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{join_non_empty, text_or_none, typed_records, AdapterError, PlaceSearcher, SearchQuery};

pub const DEFAULT_FOURSQUARE_URL: &str = "https://places-api.foursquare.com/places/search";
pub const FOURSQUARE_API_VERSION: &str = "2025-06-17";

const MAX_RADIUS_M: u32 = 100_000;
const MAX_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoursquareResponse {
    #[serde(default)]
    pub results: Vec<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
struct FsqLatLng {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FsqGeocodes {
    #[serde(default)]
    main: Option<FsqLatLng>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FsqLocation {
    address: Option<String>,
    locality: Option<String>,
    region: Option<String>,
    postcode: Option<String>,
    formatted_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FsqCategory {
    #[serde(default)]
    fsq_category_id: Option<JsonValue>,
    #[serde(default)]
    id: Option<JsonValue>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    short_name: Option<String>,
}

impl FsqCategory {
    fn token(&self) -> Option<String> {
        let id = self.fsq_category_id.as_ref().or(self.id.as_ref()).map(|v| match v {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        });
        text_or_none(self.name.as_deref())
            .or_else(|| text_or_none(self.short_name.as_deref()))
            .or_else(|| text_or_none(id.as_deref()))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FsqPlace {
    #[serde(default)]
    fsq_place_id: Option<String>,
    #[serde(default)]
    fsq_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    geocodes: Option<FsqGeocodes>,
    #[serde(default)]
    location: Option<FsqLocation>,
    #[serde(default)]
    categories: Vec<FsqCategory>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    tel: Option<String>,
    #[serde(default)]
    website: Option<String>,
}

impl FsqPlace {
    fn location(&self) -> Option<GeoPoint> {
        if let (Some(lat), Some(lng)) = (self.latitude, self.longitude) {
            return Some(GeoPoint::new(lat, lng));
        }
        let main = self.geocodes.as_ref()?.main.as_ref()?;
        Some(GeoPoint::new(main.latitude?, main.longitude?))
    }

    fn address(&self) -> Option<String> {
        let loc = self.location.as_ref()?;
        text_or_none(loc.formatted_address.as_deref()).or_else(|| {
            join_non_empty([
                loc.address.as_deref(),
                loc.locality.as_deref(),
                loc.region.as_deref(),
                loc.postcode.as_deref(),
            ])
        })
    }
}

/// Converts Foursquare results (current and legacy field layouts) into places.
pub fn normalize_foursquare(results: &[JsonValue]) -> Vec<Place> {
    typed_records::<FsqPlace>(results)
        .filter_map(|raw| {
            let id = raw.fsq_place_id.as_deref().or(raw.fsq_id.as_deref())?;
            let mut place = Place::new(Provider::Foursquare, id, raw.name.as_deref()?, raw.location()?)?;
            place.address = raw.address();
            place.categories = raw.categories.iter().filter_map(FsqCategory::token).collect();
            place.rating = raw.rating.filter(|r| r.is_finite());
            place.phone = text_or_none(raw.tel.as_deref());
            place.website = text_or_none(raw.website.as_deref());
            Some(place)
        })
        .collect()
}

/// Foursquare category ids used to narrow a bucket search.
pub fn bucket_category_ids(bucket: CategoryBucket) -> &'static [&'static str] {
    match bucket {
        CategoryBucket::FoodDrink => &["4d4b7105d754a06374d81259"],
        CategoryBucket::CoffeeWfh => &["4bf58dd8d48988d1e0931735"],
        CategoryBucket::Outdoors => &["4bf58dd8d48988d163941735"],
        CategoryBucket::ArtsCulture => &["4bf58dd8d48988d181941735"],
        CategoryBucket::Activities => &["4bf58dd8d48988d17f941735"],
        CategoryBucket::ShopsServices => &["4bf58dd8d48988d1fd941735"],
        CategoryBucket::Wellness | CategoryBucket::General => &[],
    }
}

pub struct FoursquareSearcher {
    http: Arc<HttpFetcher>,
    api_key: SecretString,
    endpoint: String,
}

impl FoursquareSearcher {
    pub fn new(http: Arc<HttpFetcher>, api_key: SecretString) -> Self {
        Self::with_endpoint(http, api_key, DEFAULT_FOURSQUARE_URL)
    }

    pub fn with_endpoint(http: Arc<HttpFetcher>, api_key: SecretString, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            api_key,
            endpoint: endpoint.into(),
        }
    }

    pub fn build_request(&self, query: &SearchQuery) -> HttpRequest {
        let mut request = HttpRequest::get(&self.endpoint)
            .query("ll", format!("{},{}", query.origin.lat, query.origin.lng))
            .query("radius", query.radius_m.min(MAX_RADIUS_M))
            .query("limit", query.limit.clamp(1, MAX_LIMIT))
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .header("X-Places-Api-Version", FOURSQUARE_API_VERSION);

        let ids = bucket_category_ids(query.bucket);
        if ids.is_empty() {
            if let Some(term) = query.bucket.search_terms().first() {
                request = request.query("query", term);
            }
        } else {
            request = request.query("fsq_category_ids", ids.join(","));
        }
        if let Some(open_now) = query.open_now {
            request = request.query("open_now", open_now);
        }
        request
    }
}

#[async_trait]
impl PlaceSearcher for FoursquareSearcher {
    fn provider(&self) -> Provider {
        Provider::Foursquare
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Place>, AdapterError> {
        let request = self.build_request(query);
        let response: FoursquareResponse = self
            .http
            .fetch_json(Provider::Foursquare.as_str(), &request)
            .await?;
        let mut places = normalize_foursquare(&response.results);
        places.truncate(query.limit);
        Ok(places)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearby_storage::HttpClientConfig;
    use serde_json::json;

    #[test]
    fn legacy_layout_uses_geocodes_and_fsq_id() {
        let results = vec![json!({
            "fsq_id": "abc",
            "name": "Legacy Cafe",
            "geocodes": {"main": {"latitude": 40.0, "longitude": -75.0}},
            "location": {"address": "5 Elm St", "locality": "Springfield"},
            "categories": [{"id": 13035, "name": "Coffee Shop"}, {"id": 13000}]
        })];
        let places = normalize_foursquare(&results);
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].place_id, "abc");
        assert_eq!(places[0].address.as_deref(), Some("5 Elm St, Springfield"));
        assert_eq!(places[0].categories, vec!["Coffee Shop", "13000"]);
    }

    #[test]
    fn records_without_id_or_coordinates_are_dropped() {
        let results = vec![
            json!({"name": "No Id", "latitude": 1.0, "longitude": 1.0}),
            json!({"fsq_place_id": "x", "name": "No Coords"}),
            json!({"fsq_place_id": "y", "name": "Half", "latitude": 1.0}),
        ];
        assert!(normalize_foursquare(&results).is_empty());
    }

    #[test]
    fn request_carries_bearer_and_bucket_ids() {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let searcher = FoursquareSearcher::new(http, SecretString::new("fsq-key".into()));
        let query = SearchQuery {
            origin: GeoPoint::new(42.0, -83.0),
            radius_m: 150_000,
            limit: 80,
            bucket: CategoryBucket::CoffeeWfh,
            categories: vec!["coffee".into()],
            open_now: Some(true),
        };
        let request = searcher.build_request(&query);
        assert!(request.query.contains(&("radius".into(), "100000".into())));
        assert!(request.query.contains(&("limit".into(), "50".into())));
        assert!(request
            .query
            .contains(&("fsq_category_ids".into(), "4bf58dd8d48988d1e0931735".into())));
        assert!(request.query.contains(&("open_now".into(), "true".into())));
        assert!(request
            .headers
            .contains(&("Authorization".into(), "Bearer fsq-key".into())));
    }
}
