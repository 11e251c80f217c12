//! Core domain model for the nearby place aggregator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "nearby-core";

/// Mean earth radius used by every great-circle computation in the workspace.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Largest search radius accepted from callers.
pub const MAX_RADIUS_M: u32 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Osm,
    Foursquare,
    Yelp,
    Cache,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Osm => "osm",
            Provider::Foursquare => "foursquare",
            Provider::Yelp => "yelp",
            Provider::Cache => "cache",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level bucket a query and a place are organised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryBucket {
    FoodDrink,
    CoffeeWfh,
    Outdoors,
    ArtsCulture,
    Activities,
    ShopsServices,
    Wellness,
    General,
}

impl CategoryBucket {
    pub const ALL: [CategoryBucket; 8] = [
        CategoryBucket::FoodDrink,
        CategoryBucket::CoffeeWfh,
        CategoryBucket::Outdoors,
        CategoryBucket::ArtsCulture,
        CategoryBucket::Activities,
        CategoryBucket::ShopsServices,
        CategoryBucket::Wellness,
        CategoryBucket::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryBucket::FoodDrink => "food_drink",
            CategoryBucket::CoffeeWfh => "coffee_wfh",
            CategoryBucket::Outdoors => "outdoors",
            CategoryBucket::ArtsCulture => "arts_culture",
            CategoryBucket::Activities => "activities",
            CategoryBucket::ShopsServices => "shops_services",
            CategoryBucket::Wellness => "wellness",
            CategoryBucket::General => "general",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CategoryBucket::FoodDrink => "Food & Drink",
            CategoryBucket::CoffeeWfh => "Coffee / Work-friendly",
            CategoryBucket::Outdoors => "Outdoors",
            CategoryBucket::ArtsCulture => "Arts & Culture",
            CategoryBucket::Activities => "Activities",
            CategoryBucket::ShopsServices => "Shops & Services",
            CategoryBucket::Wellness => "Wellness",
            CategoryBucket::General => "General",
        }
    }

    /// Maximum number of places kept for this bucket after ranking.
    pub fn cap(&self) -> usize {
        match self {
            CategoryBucket::FoodDrink => 50,
            CategoryBucket::CoffeeWfh => 20,
            CategoryBucket::Outdoors => 40,
            CategoryBucket::ArtsCulture => 25,
            CategoryBucket::Activities => 30,
            CategoryBucket::ShopsServices => 35,
            CategoryBucket::Wellness => 20,
            CategoryBucket::General => 20,
        }
    }

    /// Result count below which the provider waterfall keeps going (40% of cap, floor 1).
    pub fn threshold(&self) -> usize {
        ((self.cap() * 2) / 5).max(1)
    }

    /// Free-text terms handed to providers that search by keyword.
    pub fn search_terms(&self) -> &'static [&'static str] {
        match self {
            CategoryBucket::FoodDrink => &["restaurant", "bar", "bakery"],
            CategoryBucket::CoffeeWfh => &["coffee", "cafe"],
            CategoryBucket::Outdoors => &["park", "trail", "garden"],
            CategoryBucket::ArtsCulture => &["museum", "gallery", "library"],
            CategoryBucket::Activities => &["cinema", "bowling", "arcade"],
            CategoryBucket::ShopsServices => &["bookstore", "market", "shopping"],
            CategoryBucket::Wellness => &["spa", "yoga", "gym"],
            CategoryBucket::General => &["point of interest"],
        }
    }
}

impl fmt::Display for CategoryBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical sub-category a place is displayed and tie-broken by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCategory {
    Coffee,
    Cafe,
    Bakery,
    FastFood,
    Restaurant,
    Bar,
    Park,
    Outdoors,
    Arts,
    Activities,
    Wellness,
    Shopping,
    General,
}

impl SubCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubCategory::Coffee => "coffee",
            SubCategory::Cafe => "cafe",
            SubCategory::Bakery => "bakery",
            SubCategory::FastFood => "fast_food",
            SubCategory::Restaurant => "restaurant",
            SubCategory::Bar => "bar",
            SubCategory::Park => "park",
            SubCategory::Outdoors => "outdoors",
            SubCategory::Arts => "arts",
            SubCategory::Activities => "activities",
            SubCategory::Wellness => "wellness",
            SubCategory::Shopping => "shopping",
            SubCategory::General => "general",
        }
    }

    pub fn bucket(&self) -> CategoryBucket {
        match self {
            SubCategory::Coffee | SubCategory::Cafe => CategoryBucket::CoffeeWfh,
            SubCategory::Bakery
            | SubCategory::FastFood
            | SubCategory::Restaurant
            | SubCategory::Bar => CategoryBucket::FoodDrink,
            SubCategory::Park | SubCategory::Outdoors => CategoryBucket::Outdoors,
            SubCategory::Arts => CategoryBucket::ArtsCulture,
            SubCategory::Activities => CategoryBucket::Activities,
            SubCategory::Wellness => CategoryBucket::Wellness,
            SubCategory::Shopping => CategoryBucket::ShopsServices,
            SubCategory::General => CategoryBucket::General,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// The point itself when both coordinates are usable.
    pub fn finite(&self) -> Option<GeoPoint> {
        self.is_finite().then_some(*self)
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }

    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        self.distance_km(other) * 1000.0
    }
}

/// Heuristic travel estimate in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Travel {
    pub walk_min: f64,
    pub drive_min: f64,
}

/// Canonical place record shared by every provider and pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub provider: Provider,
    pub place_id: String,
    pub name: String,
    pub location: GeoPoint,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub primary_category: SubCategory,
    pub category_bucket: CategoryBucket,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<u32>,
    #[serde(default)]
    pub price_level: Option<u8>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub open_now: Option<bool>,
    #[serde(default)]
    pub closing_soon: Option<bool>,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub travel: Option<Travel>,
}

impl Place {
    /// Builds a place from the required fields, rejecting blank ids/names and
    /// non-finite coordinates.
    pub fn new(
        provider: Provider,
        place_id: impl Into<String>,
        name: impl Into<String>,
        location: GeoPoint,
    ) -> Option<Self> {
        let place_id = place_id.into().trim().to_string();
        let name = name.into().trim().to_string();
        if place_id.is_empty() || name.is_empty() || !location.is_finite() {
            return None;
        }
        Some(Self {
            provider,
            place_id,
            name,
            location,
            address: None,
            categories: Vec::new(),
            primary_category: SubCategory::General,
            category_bucket: CategoryBucket::General,
            rating: None,
            review_count: None,
            price_level: None,
            phone: None,
            website: None,
            open_now: None,
            closing_soon: None,
            distance_m: None,
            travel: None,
        })
    }

    /// Sets the primary category and the bucket derived from it.
    pub fn set_primary_category(&mut self, primary: SubCategory) {
        self.primary_category = primary;
        self.category_bucket = primary.bucket();
    }

    /// Global identity before cross-provider dedup.
    pub fn identity(&self) -> (Provider, &str) {
        (self.provider, self.place_id.as_str())
    }

    pub fn drive_min(&self) -> Option<f64> {
        self.travel.map(|t| t.drive_min)
    }

    pub fn walk_min(&self) -> Option<f64> {
        self.travel.map(|t| t.walk_min)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("lat must be a finite number between -90 and 90")]
    InvalidLatitude,
    #[error("lng must be a finite number between -180 and 180")]
    InvalidLongitude,
    #[error("radius_m must be between 1 and {max}")]
    InvalidRadius { max: u32 },
    #[error("categories must contain at least one value")]
    EmptyCategories,
    #[error("destinations must be a non-empty array")]
    EmptyDestinations,
    #[error("destination {index} needs a place_id and finite lat/lng")]
    InvalidDestination { index: usize },
}

impl QueryError {
    /// Stable machine-readable code used in responses and request logs.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidLatitude => "invalid_lat",
            QueryError::InvalidLongitude => "invalid_lng",
            QueryError::InvalidRadius { .. } => "invalid_radius",
            QueryError::EmptyCategories => "empty_categories",
            QueryError::EmptyDestinations => "empty_destinations",
            QueryError::InvalidDestination { .. } => "invalid_destination",
        }
    }
}

fn validate_point(lat: f64, lng: f64) -> Result<(), QueryError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(QueryError::InvalidLatitude);
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(QueryError::InvalidLongitude);
    }
    Ok(())
}

/// Search request handed to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacesQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: u32,
    pub categories: Vec<String>,
    #[serde(default)]
    pub open_now: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub force_refresh: bool,
}

impl PlacesQuery {
    pub fn new(lat: f64, lng: f64, radius_m: u32, categories: Vec<String>) -> Self {
        Self {
            lat,
            lng,
            radius_m,
            categories,
            open_now: None,
            limit: None,
            force_refresh: false,
        }
    }

    pub fn origin(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        validate_point(self.lat, self.lng)?;
        if self.radius_m == 0 || self.radius_m > MAX_RADIUS_M {
            return Err(QueryError::InvalidRadius { max: MAX_RADIUS_M });
        }
        if self.categories.iter().all(|c| c.trim().is_empty()) {
            return Err(QueryError::EmptyCategories);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelDestination {
    pub place_id: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelTimesRequest {
    pub origin: GeoPoint,
    pub destinations: Vec<TravelDestination>,
}

impl TravelTimesRequest {
    pub fn validate(&self) -> Result<(), QueryError> {
        validate_point(self.origin.lat, self.origin.lng)?;
        if self.destinations.is_empty() {
            return Err(QueryError::EmptyDestinations);
        }
        for (index, dest) in self.destinations.iter().enumerate() {
            if dest.place_id.trim().is_empty() || !dest.lat.is_finite() || !dest.lng.is_finite() {
                return Err(QueryError::InvalidDestination { index });
            }
        }
        Ok(())
    }
}

/// Where a result set (or a single estimate) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Cache,
    Live,
}

/// Catalogue row describing one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub key: CategoryBucket,
    pub label: String,
    pub cap: usize,
    pub minimum: usize,
}

pub fn bucket_catalogue() -> Vec<BucketInfo> {
    CategoryBucket::ALL
        .iter()
        .map(|b| BucketInfo {
            key: *b,
            label: b.label().to_string(),
            cap: b.cap(),
            minimum: b.threshold(),
        })
        .collect()
}

/// Per-request analytics record handed to the request log sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub request_id: String,
    pub requested_at: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: u32,
    pub categories: Vec<String>,
    pub buckets: Vec<CategoryBucket>,
    pub categories_normalized: Vec<SubCategory>,
    pub providers_used: Vec<Provider>,
    pub cache_hit: bool,
    pub result_count: usize,
    pub duration_ms: u64,
    #[serde(default)]
    pub error_code: Option<String>,
}
