//! Cache stores, request log sink and HTTP fetch utilities.

mod cache;
mod http;
mod request_log;

use sha2::{Digest, Sha256};
use thiserror::Error;

pub use cache::{
    CacheMetadata, CacheStore, CachedPlaces, FileCacheStore, MemoryCacheStore, NoopCacheStore,
    TravelRecord,
};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, HttpMethod, HttpRequest, RetryDisposition,
};
pub use request_log::{JsonlRequestLog, NoopRequestLog, RequestLog};

pub const CRATE_NAME: &str = "nearby-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Backend(String),
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Deterministic key for a bucket search: coordinates rounded to 4 decimals,
/// radius, bucket and the open-now flag.
pub fn places_cache_key(lat: f64, lng: f64, radius_m: u32, bucket: &str, open_now: Option<bool>) -> String {
    let open = match open_now {
        Some(true) => "open",
        Some(false) => "any",
        None => "unset",
    };
    let raw = format!("{lat:.4}|{lng:.4}|{radius_m}|{bucket}|{open}");
    sha256_hex(raw.as_bytes())
}

/// Deterministic key for a travel origin (coordinates rounded to 4 decimals).
pub fn origin_cache_key(lat: f64, lng: f64) -> String {
    sha256_hex(format!("{lat:.4}|{lng:.4}").as_bytes())
}
