use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use nearby_core::{CategoryBucket, GeoPoint, Place, Provider};
use nearby_storage::{HttpFetcher, HttpRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{join_non_empty, text_or_none, typed_records, AdapterError, PlaceSearcher, SearchQuery};

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

const CATEGORY_TAGS: [&str; 4] = ["amenity", "leisure", "shop", "tourism"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

impl OverpassElement {
    fn location(&self) -> Option<GeoPoint> {
        match (self.lat, self.lon, &self.center) {
            (Some(lat), Some(lon), _) => Some(GeoPoint::new(lat, lon)),
            (_, _, Some(center)) => Some(GeoPoint::new(center.lat, center.lon)),
            _ => None,
        }
    }

    fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    fn categories(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let tag_values = CATEGORY_TAGS
            .iter()
            .filter_map(|key| self.tag(key))
            .chain(self.tag("cuisine").into_iter().flat_map(|c| c.split(';')));
        for value in tag_values {
            let value = value.trim();
            if !value.is_empty() && !out.iter().any(|v| v == value) {
                out.push(value.to_string());
            }
        }
        out
    }

    fn address(&self) -> Option<String> {
        let number = text_or_none(self.tag("addr:housenumber"));
        let street = match (number, text_or_none(self.tag("addr:street"))) {
            (Some(number), Some(street)) => Some(format!("{number} {street}")),
            (None, street) => street,
            (Some(_), None) => None,
        };
        join_non_empty([
            street.as_deref(),
            self.tag("addr:city"),
            self.tag("addr:postcode"),
        ])
    }
}

/// Converts Overpass elements into places. Elements without a name or a
/// usable coordinate (own or way/relation centre) are dropped.
pub fn normalize_overpass(elements: &[JsonValue]) -> Vec<Place> {
    typed_records::<OverpassElement>(elements)
        .filter_map(|el| {
            let location = el.location()?;
            let id = format!("{}/{}", el.kind, el.id);
            let mut place = Place::new(Provider::Osm, id, el.tag("name")?, location)?;
            place.address = el.address();
            place.categories = el.categories();
            place.phone = text_or_none(el.tag("phone").or(el.tag("contact:phone")));
            place.website = text_or_none(el.tag("website").or(el.tag("contact:website")));
            Some(place)
        })
        .collect()
}

/// Tag filters (key, anchored value regex) selecting a bucket's places.
pub fn bucket_tag_filters(bucket: CategoryBucket) -> &'static [(&'static str, &'static str)] {
    match bucket {
        CategoryBucket::CoffeeWfh => &[("amenity", "cafe"), ("shop", "coffee")],
        CategoryBucket::FoodDrink => &[
            ("amenity", "restaurant|fast_food|bar|pub|biergarten|food_court|ice_cream"),
            ("shop", "bakery|pastry"),
        ],
        CategoryBucket::Outdoors => &[
            ("leisure", "park|garden|nature_reserve|playground|dog_park"),
            ("tourism", "viewpoint|picnic_site"),
        ],
        CategoryBucket::ArtsCulture => &[
            ("tourism", "museum|gallery|artwork"),
            ("amenity", "arts_centre|theatre|library"),
        ],
        CategoryBucket::Activities => &[
            ("leisure", "bowling_alley|amusement_arcade|sports_centre|escape_game|miniature_golf"),
            ("amenity", "cinema"),
        ],
        CategoryBucket::ShopsServices => &[("shop", "books|mall|department_store|gift|clothes|supermarket")],
        CategoryBucket::Wellness => &[
            ("leisure", "fitness_centre|sauna"),
            ("shop", "massage|beauty"),
            ("amenity", "spa"),
        ],
        CategoryBucket::General => &[("amenity", "cafe|restaurant|library|marketplace")],
    }
}

/// Overpass QL for nodes, ways and relations around the origin; ways and
/// relations report their centre.
pub fn build_overpass_query(query: &SearchQuery) -> String {
    let around = format!(
        "(around:{},{:.6},{:.6})",
        query.radius_m, query.origin.lat, query.origin.lng
    );
    let selectors: String = bucket_tag_filters(query.bucket)
        .iter()
        .map(|(key, values)| format!("nwr[\"{key}\"~\"^({values})$\"][\"name\"]{around};"))
        .collect();
    format!("[out:json][timeout:25];({selectors});out center {};", query.limit.max(1))
}

pub struct OverpassSearcher {
    http: Arc<HttpFetcher>,
    endpoint: String,
}

impl OverpassSearcher {
    pub fn new(http: Arc<HttpFetcher>, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PlaceSearcher for OverpassSearcher {
    fn provider(&self) -> Provider {
        Provider::Osm
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Place>, AdapterError> {
        let ql = build_overpass_query(query);
        debug!(bucket = %query.bucket, "overpass query built");
        let request = HttpRequest::post_form(&self.endpoint, vec![("data".to_string(), ql)]);
        let response: OverpassResponse = self.http.fetch_json(Provider::Osm.as_str(), &request).await?;
        let mut places = normalize_overpass(&response.elements);
        places.truncate(query.limit);
        Ok(places)
    }
}
