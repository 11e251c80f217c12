use std::sync::Arc;

use async_trait::async_trait;
use nearby_core::{CategoryBucket, GeoPoint, Place, Provider};
use nearby_storage::{HttpFetcher, HttpRequest};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{join_non_empty, text_or_none, typed_records, AdapterError, PlaceSearcher, SearchQuery};

pub const DEFAULT_YELP_URL: &str = "https://api.yelp.com/v3/businesses/search";

const MAX_RADIUS_M: u32 = 40_000;
const MAX_LIMIT: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YelpResponse {
    #[serde(default)]
    pub businesses: Vec<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
struct YelpCoordinates {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct YelpLocation {
    address1: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
    #[serde(default)]
    display_address: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct YelpCategory {
    alias: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct YelpBusiness {
    id: String,
    name: Option<String>,
    coordinates: Option<YelpCoordinates>,
    #[serde(default)]
    location: Option<YelpLocation>,
    #[serde(default)]
    categories: Vec<YelpCategory>,
    rating: Option<f64>,
    review_count: Option<u32>,
    price: Option<String>,
    display_phone: Option<String>,
    phone: Option<String>,
    url: Option<String>,
}

impl YelpBusiness {
    fn location(&self) -> Option<GeoPoint> {
        let coords = self.coordinates.as_ref()?;
        Some(GeoPoint::new(coords.latitude?, coords.longitude?))
    }

    fn address(&self) -> Option<String> {
        let loc = self.location.as_ref()?;
        join_non_empty(loc.display_address.iter().map(|line| Some(line.as_str()))).or_else(|| {
            join_non_empty([
                loc.address1.as_deref(),
                loc.city.as_deref(),
                loc.state.as_deref(),
                loc.zip_code.as_deref(),
            ])
        })
    }
}

/// "$" through "$$$$" map to levels 1-4; anything else is unknown.
fn price_level(price: Option<&str>) -> Option<u8> {
    let price = price?.trim();
    if price.is_empty() || price.len() > 4 || !price.chars().all(|c| c == '$') {
        return None;
    }
    Some(price.len() as u8)
}

/// Converts Yelp businesses into places; businesses missing coordinates are dropped.
pub fn normalize_yelp(businesses: &[JsonValue]) -> Vec<Place> {
    typed_records::<YelpBusiness>(businesses)
        .filter_map(|raw| {
            let mut place = Place::new(Provider::Yelp, &raw.id, raw.name.as_deref()?, raw.location()?)?;
            place.address = raw.address();
            place.categories = raw
                .categories
                .iter()
                .filter_map(|c| text_or_none(c.alias.as_deref()).or_else(|| text_or_none(c.title.as_deref())))
                .collect();
            place.rating = raw.rating.filter(|r| r.is_finite());
            place.review_count = raw.review_count;
            place.price_level = price_level(raw.price.as_deref());
            place.phone = text_or_none(raw.display_phone.as_deref()).or_else(|| text_or_none(raw.phone.as_deref()));
            place.website = text_or_none(raw.url.as_deref());
            Some(place)
        })
        .collect()
}

/// Yelp category aliases used to narrow a bucket search.
pub fn bucket_aliases(bucket: CategoryBucket) -> &'static str {
    match bucket {
        CategoryBucket::FoodDrink => "restaurants,bars,bakeries",
        CategoryBucket::CoffeeWfh => "coffee,cafes",
        CategoryBucket::Outdoors => "parks,hiking,gardens",
        CategoryBucket::ArtsCulture => "museums,galleries,libraries",
        CategoryBucket::Activities => "movietheaters,bowling,arcades",
        CategoryBucket::ShopsServices => "shopping,bookstores",
        CategoryBucket::Wellness => "yoga,spas,gyms",
        CategoryBucket::General => "",
    }
}

pub struct YelpSearcher {
    http: Arc<HttpFetcher>,
    api_key: SecretString,
    endpoint: String,
}

impl YelpSearcher {
    pub fn new(http: Arc<HttpFetcher>, api_key: SecretString) -> Self {
        Self::with_endpoint(http, api_key, DEFAULT_YELP_URL)
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
            .query("latitude", query.origin.lat)
            .query("longitude", query.origin.lng)
            .query("radius", query.radius_m.min(MAX_RADIUS_M))
            .query("limit", query.limit.clamp(1, MAX_LIMIT))
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()));

        let aliases = bucket_aliases(query.bucket);
        if !aliases.is_empty() {
            request = request.query("categories", aliases);
        }
        if let Some(open_now) = query.open_now {
            request = request.query("open_now", open_now);
        }
        request
    }
}

#[async_trait]
impl PlaceSearcher for YelpSearcher {
    fn provider(&self) -> Provider {
        Provider::Yelp
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Place>, AdapterError> {
        let request = self.build_request(query);
        let response: YelpResponse = self.http.fetch_json(Provider::Yelp.as_str(), &request).await?;
        let mut places = normalize_yelp(&response.businesses);
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
    fn price_strings_map_to_levels() {
        assert_eq!(price_level(Some("$")), Some(1));
        assert_eq!(price_level(Some("$$$$")), Some(4));
        assert_eq!(price_level(Some("$$$$$")), None);
        assert_eq!(price_level(Some("££")), None);
        assert_eq!(price_level(None), None);
    }

    #[test]
    fn falls_back_to_structured_address_and_title() {
        let businesses = vec![json!({
            "id": "b1",
            "name": "Tea Room",
            "coordinates": {"latitude": 10.0, "longitude": 20.0},
            "location": {"address1": "9 Oak Ave", "city": "Ypsilanti", "display_address": []},
            "categories": [{"title": "Tea Rooms"}],
            "phone": "+15550100"
        })];
        let places = normalize_yelp(&businesses);
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].address.as_deref(), Some("9 Oak Ave, Ypsilanti"));
        assert_eq!(places[0].categories, vec!["Tea Rooms"]);
        assert_eq!(places[0].phone.as_deref(), Some("+15550100"));
    }

    #[test]
    fn general_bucket_sends_no_category_filter() {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let searcher = YelpSearcher::new(http, SecretString::new("yelp-key".into()));
        let mut query = SearchQuery {
            origin: GeoPoint::new(42.0, -83.0),
            radius_m: 45_000,
            limit: 20,
            bucket: CategoryBucket::General,
            categories: vec![],
            open_now: None,
        };
        let request = searcher.build_request(&query);
        assert!(request.query.iter().all(|(k, _)| k != "categories"));
        assert!(request.query.contains(&("radius".into(), "40000".into())));

        query.bucket = CategoryBucket::CoffeeWfh;
        let request = searcher.build_request(&query);
        assert!(request.query.contains(&("categories".into(), "coffee,cafes".into())));
    }
}
