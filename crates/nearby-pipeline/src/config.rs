use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use nearby_adapters::osm::DEFAULT_OVERPASS_URL;
use nearby_core::{CategoryBucket, Provider};
use secrecy::SecretString;
use serde::Deserialize;

/// Process configuration, read once by the entry point and passed down.
#[derive(Debug, Clone)]
pub struct NearbyConfig {
    pub foursquare_api_key: Option<SecretString>,
    pub yelp_api_key: Option<SecretString>,
    pub overpass_url: String,
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub request_log_path: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub bind_addr: String,
    pub providers_file: PathBuf,
}

impl Default for NearbyConfig {
    fn default() -> Self {
        Self {
            foursquare_api_key: None,
            yelp_api_key: None,
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            cache_dir: None,
            cache_ttl: Duration::from_secs(86_400),
            request_log_path: None,
            http_timeout_secs: 10,
            user_agent: "nearby-open-now/0.1".to_string(),
            bind_addr: "127.0.0.1:8080".to_string(),
            providers_file: PathBuf::from("providers.yaml"),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl NearbyConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            foursquare_api_key: non_empty_var("FOURSQUARE_API_KEY").map(|v| SecretString::new(v.into())),
            yelp_api_key: non_empty_var("YELP_API_KEY").map(|v| SecretString::new(v.into())),
            overpass_url: non_empty_var("OVERPASS_URL").unwrap_or(defaults.overpass_url),
            cache_dir: non_empty_var("NEARBY_CACHE_DIR").map(PathBuf::from),
            cache_ttl: non_empty_var("NEARBY_CACHE_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            request_log_path: non_empty_var("NEARBY_REQUEST_LOG").map(PathBuf::from),
            http_timeout_secs: non_empty_var("NEARBY_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            user_agent: non_empty_var("NEARBY_USER_AGENT").unwrap_or(defaults.user_agent),
            bind_addr: non_empty_var("NEARBY_BIND_ADDR").unwrap_or(defaults.bind_addr),
            providers_file: non_empty_var("NEARBY_PROVIDERS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.providers_file),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct ProvidersFile {
    default_order: Vec<Provider>,
    #[serde(default)]
    buckets: BTreeMap<CategoryBucket, Vec<Provider>>,
    #[serde(default)]
    providers: BTreeMap<Provider, ProviderSettings>,
}

/// Which providers a bucket's waterfall tries, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPlan {
    default_order: Vec<Provider>,
    overrides: BTreeMap<CategoryBucket, Vec<Provider>>,
    notes: BTreeMap<Provider, String>,
}

impl Default for ProviderPlan {
    fn default() -> Self {
        Self {
            default_order: vec![Provider::Foursquare, Provider::Yelp, Provider::Osm],
            overrides: BTreeMap::from([(
                CategoryBucket::Outdoors,
                vec![Provider::Osm, Provider::Foursquare, Provider::Yelp],
            )]),
            notes: BTreeMap::new(),
        }
    }
}

impl ProviderPlan {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: ProvidersFile = serde_yaml::from_str(text).context("parsing provider registry")?;
        let disabled: Vec<Provider> = file
            .providers
            .iter()
            .filter(|(_, settings)| !settings.enabled)
            .map(|(provider, _)| *provider)
            .collect();
        let keep = |order: Vec<Provider>| -> Vec<Provider> {
            let mut out = Vec::new();
            for provider in order {
                if provider != Provider::Cache && !disabled.contains(&provider) && !out.contains(&provider) {
                    out.push(provider);
                }
            }
            out
        };
        let notes = file
            .providers
            .iter()
            .filter_map(|(provider, settings)| Some((*provider, settings.notes.clone()?)))
            .collect();
        Ok(Self {
            default_order: keep(file.default_order),
            overrides: file
                .buckets
                .into_iter()
                .map(|(bucket, order)| (bucket, keep(order)))
                .collect(),
            notes,
        })
    }

    /// Reads the registry file; a missing file yields the built-in plan.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_yaml(&text).with_context(|| format!("loading {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Operator note attached to a provider in the registry.
    pub fn note_for(&self, provider: Provider) -> Option<&str> {
        self.notes.get(&provider).map(String::as_str)
    }

    pub fn order_for(&self, bucket: CategoryBucket) -> &[Provider] {
        self.overrides
            .get(&bucket)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_order)
    }
}
