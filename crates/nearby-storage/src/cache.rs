use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nearby_core::{Place, Provider, Travel};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{sha256_hex, StorageError};

/// Bookkeeping stored next to a cached bucket result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub providers: Vec<Provider>,
    pub count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPlaces {
    pub places: Vec<Place>,
    pub metadata: CacheMetadata,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelRecord {
    pub place_id: String,
    pub travel: Travel,
}

/// Key-value store for bucket results and travel estimates.
///
/// Writes are idempotent upserts keyed by deterministic hashes, so concurrent
/// requests never need to coordinate. Expired entries read as misses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_places(&self, key: &str) -> Result<Option<CachedPlaces>, StorageError>;

    async fn put_places(
        &self,
        key: &str,
        places: &[Place],
        metadata: CacheMetadata,
    ) -> Result<(), StorageError>;

    async fn get_travel(
        &self,
        origin_key: &str,
        place_ids: &[String],
    ) -> Result<HashMap<String, Travel>, StorageError>;

    async fn put_travel(&self, origin_key: &str, records: &[TravelRecord]) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Expiring<T> {
    expires_at: DateTime<Utc>,
    value: T,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { expires_at, value }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

}

/// In-process cache with a fixed TTL. Expired entries are dropped when read
/// and swept on every write.
#[derive(Debug)]
pub struct MemoryCacheStore {
    ttl: Duration,
    places: RwLock<HashMap<String, Expiring<CachedPlaces>>>,
    travel: RwLock<HashMap<(String, String), Expiring<Travel>>>,
}

impl MemoryCacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            places: RwLock::new(HashMap::new()),
            travel: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored (places, travel) entries, expired or not.
    pub async fn entry_counts(&self) -> (usize, usize) {
        (self.places.read().await.len(), self.travel.read().await.len())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_places(&self, key: &str) -> Result<Option<CachedPlaces>, StorageError> {
        let found = self.places.read().await.get(key).cloned();
        match found {
            Some(entry) if entry.is_live(Utc::now()) => Ok(Some(entry.value)),
            Some(_) => {
                let mut map = self.places.write().await;
                let now = Utc::now();
                if map.get(key).is_some_and(|e| !e.is_live(now)) {
                    map.remove(key);
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_places(
        &self,
        key: &str,
        places: &[Place],
        metadata: CacheMetadata,
    ) -> Result<(), StorageError> {
        let entry = CachedPlaces {
            places: places.to_vec(),
            metadata,
            stored_at: Utc::now(),
        };
        let mut map = self.places.write().await;
        let now = Utc::now();
        map.retain(|_, e| e.is_live(now));
        map.insert(key.to_string(), Expiring::new(entry, self.ttl));
        Ok(())
    }

    async fn get_travel(
        &self,
        origin_key: &str,
        place_ids: &[String],
    ) -> Result<HashMap<String, Travel>, StorageError> {
        let now = Utc::now();
        let mut hits = HashMap::new();
        let mut expired = Vec::new();
        {
            let map = self.travel.read().await;
            for id in place_ids {
                let key = (origin_key.to_string(), id.clone());
                match map.get(&key) {
                    Some(entry) if entry.is_live(now) => {
                        hits.insert(id.clone(), entry.value);
                    }
                    Some(_) => expired.push(key),
                    None => {}
                }
            }
        }
        if !expired.is_empty() {
            let mut map = self.travel.write().await;
            for key in expired {
                if map.get(&key).is_some_and(|e| !e.is_live(now)) {
                    map.remove(&key);
                }
            }
        }
        Ok(hits)
    }

    async fn put_travel(&self, origin_key: &str, records: &[TravelRecord]) -> Result<(), StorageError> {
        let mut map = self.travel.write().await;
        let now = Utc::now();
        map.retain(|_, e| e.is_live(now));
        for record in records {
            map.insert(
                (origin_key.to_string(), record.place_id.clone()),
                Expiring::new(record.travel, self.ttl),
            );
        }
        Ok(())
    }
}

/// Cache that stores nothing; every read is a miss.
#[derive(Debug, Default)]
pub struct NoopCacheStore;

#[async_trait]
impl CacheStore for NoopCacheStore {
    async fn get_places(&self, _key: &str) -> Result<Option<CachedPlaces>, StorageError> {
        Ok(None)
    }

    async fn put_places(
        &self,
        _key: &str,
        _places: &[Place],
        _metadata: CacheMetadata,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get_travel(
        &self,
        _origin_key: &str,
        _place_ids: &[String],
    ) -> Result<HashMap<String, Travel>, StorageError> {
        Ok(HashMap::new())
    }

    async fn put_travel(&self, _origin_key: &str, _records: &[TravelRecord]) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Hash-addressed JSON files under a root directory, written atomically via
/// temp file + rename so concurrent writers of the same key never tear.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
    ttl: Duration,
}

impl FileCacheStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn places_path(&self, key: &str) -> PathBuf {
        self.root.join("places").join(format!("{key}.json"))
    }

    fn travel_path(&self, origin_key: &str, place_id: &str) -> PathBuf {
        self.root
            .join("travel")
            .join(origin_key)
            .join(format!("{}.json", sha256_hex(place_id.as_bytes())))
    }

    async fn read_entry<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StorageError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: Expiring<T> = serde_json::from_slice(&bytes)?;
        if !entry.is_live(Utc::now()) {
            let _ = fs::remove_file(path).await;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn write_entry<T: Serialize>(&self, path: &Path, value: T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&Expiring::new(value, self.ttl))?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::Backend(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get_places(&self, key: &str) -> Result<Option<CachedPlaces>, StorageError> {
        self.read_entry(&self.places_path(key)).await
    }

    async fn put_places(
        &self,
        key: &str,
        places: &[Place],
        metadata: CacheMetadata,
    ) -> Result<(), StorageError> {
        let entry = CachedPlaces {
            places: places.to_vec(),
            metadata,
            stored_at: Utc::now(),
        };
        self.write_entry(&self.places_path(key), entry).await
    }

    async fn get_travel(
        &self,
        origin_key: &str,
        place_ids: &[String],
    ) -> Result<HashMap<String, Travel>, StorageError> {
        let mut out = HashMap::new();
        for id in place_ids {
            if let Some(travel) = self.read_entry::<Travel>(&self.travel_path(origin_key, id)).await? {
                out.insert(id.clone(), travel);
            }
        }
        Ok(out)
    }

    async fn put_travel(&self, origin_key: &str, records: &[TravelRecord]) -> Result<(), StorageError> {
        for record in records {
            self.write_entry(&self.travel_path(origin_key, &record.place_id), record.travel)
                .await?;
        }
        Ok(())
    }
}
