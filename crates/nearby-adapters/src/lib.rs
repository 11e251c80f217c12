//! Provider payload schemas, normalizers and searcher implementations.

pub mod foursquare;
pub mod osm;
pub mod yelp;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nearby_core::{CategoryBucket, GeoPoint, Place, Provider};
use nearby_storage::FetchError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use foursquare::FoursquareSearcher;
pub use osm::OverpassSearcher;
pub use yelp::YelpSearcher;

pub const CRATE_NAME: &str = "nearby-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

/// Parameters for one provider call within a bucket waterfall.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub origin: GeoPoint,
    pub radius_m: u32,
    pub limit: usize,
    pub bucket: CategoryBucket,
    pub categories: Vec<String>,
    pub open_now: Option<bool>,
}

/// One place-search provider. "No results" is `Ok(vec![])`; errors are
/// reserved for transport, auth and payload failures.
#[async_trait]
pub trait PlaceSearcher: Send + Sync {
    fn provider(&self) -> Provider;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Place>, AdapterError>;
}

/// Raw response body of a provider, tagged by origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", content = "payload", rename_all = "snake_case")]
pub enum RawProviderPayload {
    Osm(osm::OverpassResponse),
    Foursquare(foursquare::FoursquareResponse),
    Yelp(yelp::YelpResponse),
}

impl RawProviderPayload {
    pub fn provider(&self) -> Provider {
        match self {
            RawProviderPayload::Osm(_) => Provider::Osm,
            RawProviderPayload::Foursquare(_) => Provider::Foursquare,
            RawProviderPayload::Yelp(_) => Provider::Yelp,
        }
    }

    /// Converts every well-formed record into a [`Place`]; malformed records are dropped.
    pub fn normalize(&self) -> Vec<Place> {
        match self {
            RawProviderPayload::Osm(resp) => osm::normalize_overpass(&resp.elements),
            RawProviderPayload::Foursquare(resp) => foursquare::normalize_foursquare(&resp.results),
            RawProviderPayload::Yelp(resp) => yelp::normalize_yelp(&resp.businesses),
        }
    }
}

/// Typed view of each raw record; records that do not fit the schema are skipped.
pub(crate) fn typed_records<'a, T: DeserializeOwned + 'a>(
    records: &'a [JsonValue],
) -> impl Iterator<Item = T> + 'a {
    records
        .iter()
        .filter_map(|record| serde_json::from_value::<T>(record.clone()).ok())
}

pub(crate) fn text_or_none(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn join_non_empty<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let joined = parts
        .into_iter()
        .filter_map(text_or_none)
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Captured provider response used for offline runs and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub fixture_id: String,
    pub captured_from_url: String,
    pub fetched_at: DateTime<Utc>,
    pub raw: RawProviderPayload,
    #[serde(default)]
    pub notes: Option<String>,
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub fn fixture_bundle_path(fixtures_root: impl AsRef<Path>, provider: Provider) -> std::path::PathBuf {
    fixtures_root
        .as_ref()
        .join(provider.as_str())
        .join("sample")
        .join("bundle.json")
}

/// Serves the normalized contents of a captured bundle regardless of query.
#[derive(Debug, Clone)]
pub struct FixtureSearcher {
    provider: Provider,
    places: Vec<Place>,
}

impl FixtureSearcher {
    pub fn from_bundle(bundle: &FixtureBundle) -> Self {
        Self {
            provider: bundle.raw.provider(),
            places: bundle.raw.normalize(),
        }
    }

    pub fn load(fixtures_root: impl AsRef<Path>, provider: Provider) -> Result<Self> {
        let bundle = load_fixture_bundle(fixture_bundle_path(fixtures_root, provider))?;
        Ok(Self::from_bundle(&bundle))
    }
}

#[async_trait]
impl PlaceSearcher for FixtureSearcher {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Place>, AdapterError> {
        Ok(self.places.iter().take(query.limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct GoldenPlace {
        place_id: String,
        name: String,
        categories: Vec<String>,
        address: Option<String>,
    }

    fn fixtures_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .canonicalize()
            .expect("fixtures root")
    }

    fn expected_snapshot(provider: Provider) -> Vec<GoldenPlace> {
        let path = fixtures_root()
            .join(provider.as_str())
            .join("sample")
            .join("snapshot.json");
        let text = fs::read_to_string(path).expect("read snapshot");
        serde_json::from_str(&text).expect("parse snapshot")
    }

    fn to_golden(places: &[Place]) -> Vec<GoldenPlace> {
        places
            .iter()
            .map(|p| GoldenPlace {
                place_id: p.place_id.clone(),
                name: p.name.clone(),
                categories: p.categories.clone(),
                address: p.address.clone(),
            })
            .collect()
    }

    fn assert_snapshot(provider: Provider) {
        let bundle = load_fixture_bundle(fixture_bundle_path(fixtures_root(), provider)).unwrap();
        assert_eq!(bundle.raw.provider(), provider);
        let places = bundle.raw.normalize();
        for place in &places {
            assert_eq!(place.provider, provider);
            assert!(place.location.is_finite());
            assert!(!place.place_id.is_empty());
        }
        assert_eq!(to_golden(&places), expected_snapshot(provider));
    }

    #[test]
    fn golden_snapshot_osm() {
        assert_snapshot(Provider::Osm);
    }

    #[test]
    fn golden_snapshot_foursquare() {
        assert_snapshot(Provider::Foursquare);
    }

    #[test]
    fn golden_snapshot_yelp() {
        assert_snapshot(Provider::Yelp);
    }

    #[tokio::test]
    async fn fixture_searcher_honours_limit() {
        let searcher = FixtureSearcher::load(fixtures_root(), Provider::Osm).unwrap();
        assert_eq!(searcher.provider(), Provider::Osm);
        let query = SearchQuery {
            origin: GeoPoint::new(42.3314, -83.0458),
            radius_m: 1500,
            limit: 1,
            bucket: CategoryBucket::CoffeeWfh,
            categories: vec!["coffee".into()],
            open_now: None,
        };
        assert_eq!(searcher.search(&query).await.unwrap().len(), 1);
    }

    #[test]
    fn join_skips_blank_parts() {
        assert_eq!(
            join_non_empty([Some("1 Main St"), None, Some("  "), Some("Detroit")]),
            Some("1 Main St, Detroit".to_string())
        );
        assert_eq!(join_non_empty([None, Some("")]), None);
    }
}
