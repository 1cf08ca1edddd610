//! Cache Store Adapter.
//!
//! ```text
//! CacheStore (caches)
//!     └── Cache generation ("appvilla-cache-v1")
//!             └── RequestKey → Response
//! ```
//!
//! Generations are kept in creation order; a lookup across all of them
//! returns the first hit, oldest generation first.

use std::path::Path;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::SwResult;
use crate::request::{RequestKey, Response};

/// Contract the agent needs from the host's cache storage.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, name: &str) -> SwResult<()>;

    /// Write a batch of entries into one generation. Either all land or none do.
    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, Response)>) -> SwResult<()>;

    /// Look a request up across every generation.
    async fn match_request(&self, key: &RequestKey) -> SwResult<Option<Response>>;

    /// Look a request up in one generation.
    async fn match_in(&self, name: &str, key: &RequestKey) -> SwResult<Option<Response>>;

    /// Names of all generations, in creation order.
    async fn keys(&self) -> SwResult<Vec<String>>;

    /// Delete a generation. Returns whether it existed.
    async fn delete(&self, name: &str) -> SwResult<bool>;
}

// ==================== Cache ====================

/// One named cache generation.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    pub name: String,
    entries: HashMap<RequestKey, Response>,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn match_request(&self, key: &RequestKey) -> Option<&Response> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: RequestKey, response: Response) {
        self.entries.insert(key, response);
    }

    /// Stored keys, sorted for stable output.
    pub fn keys(&self) -> Vec<&RequestKey> {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        keys
    }
}

// ==================== Cache Storage ====================

/// Ordered set of cache generations.
#[derive(Debug, Default, Clone)]
pub struct CacheStorage {
    caches: Vec<Cache>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if it doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let index = match self.position(name) {
            Some(index) => index,
            None => {
                self.caches.push(Cache::new(name));
                self.caches.len() - 1
            }
        };
        &mut self.caches[index]
    }

    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.iter().find(|cache| cache.name == name)
    }

    pub fn delete(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.caches.remove(index);
                true
            }
            None => false,
        }
    }

    /// All cache names, in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.iter().map(|cache| cache.name.as_str()).collect()
    }

    /// Match across all caches.
    pub fn match_request(&self, key: &RequestKey) -> Option<&Response> {
        self.caches.iter().find_map(|cache| cache.match_request(key))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.caches.iter().position(|cache| cache.name == name)
    }
}

// ==================== Persistence ====================

/// On-disk layout of a cache storage.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCaches {
    generations: Vec<PersistedGeneration>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedGeneration {
    name: String,
    entries: Vec<PersistedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    request: RequestKey,
    response: Response,
}

impl From<&CacheStorage> for PersistedCaches {
    fn from(storage: &CacheStorage) -> Self {
        let generations = storage
            .caches
            .iter()
            .map(|cache| PersistedGeneration {
                name: cache.name.clone(),
                entries: cache
                    .keys()
                    .into_iter()
                    .map(|key| PersistedEntry {
                        request: key.clone(),
                        response: cache.entries[key].clone(),
                    })
                    .collect(),
            })
            .collect();
        Self { generations }
    }
}

impl From<PersistedCaches> for CacheStorage {
    fn from(persisted: PersistedCaches) -> Self {
        let mut storage = CacheStorage::new();
        for generation in persisted.generations {
            let cache = storage.open(&generation.name);
            for entry in generation.entries {
                cache.put(entry.request, entry.response);
            }
        }
        storage
    }
}

// ==================== Memory Store ====================

/// In-memory [`CacheStore`], optionally persisted as a JSON file.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    storage: RwLock<CacheStorage>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_storage(storage: CacheStorage) -> Self {
        Self {
            storage: RwLock::new(storage),
        }
    }

    /// Copy of the current storage.
    pub async fn snapshot(&self) -> CacheStorage {
        self.storage.read().await.clone()
    }

    /// Load a store saved with [`MemoryCacheStore::save`]. A missing file yields an empty store.
    pub async fn load(path: &Path) -> SwResult<Self> {
        let json = match tokio::fs::read(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No persisted caches, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let persisted: PersistedCaches = serde_json::from_slice(&json)?;
        debug!(
            path = %path.display(),
            generations = persisted.generations.len(),
            "Loaded persisted caches"
        );
        Ok(Self::from_storage(persisted.into()))
    }

    /// Write every generation to `path` as JSON.
    pub async fn save(&self, path: &Path) -> SwResult<()> {
        let persisted = PersistedCaches::from(&*self.storage.read().await);
        let json = serde_json::to_vec_pretty(&persisted)?;
        tokio::fs::write(path, json).await?;
        debug!(
            path = %path.display(),
            generations = persisted.generations.len(),
            "Saved caches"
        );
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, name: &str) -> SwResult<()> {
        self.storage.write().await.open(name);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, Response)>) -> SwResult<()> {
        let mut storage = self.storage.write().await;
        let cache = storage.open(name);
        trace!(cache = name, count = entries.len(), "Storing entries");
        for (key, response) in entries {
            cache.put(key, response);
        }
        Ok(())
    }

    async fn match_request(&self, key: &RequestKey) -> SwResult<Option<Response>> {
        Ok(self.storage.read().await.match_request(key).cloned())
    }

    async fn match_in(&self, name: &str, key: &RequestKey) -> SwResult<Option<Response>> {
        Ok(self
            .storage
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn keys(&self) -> SwResult<Vec<String>> {
        Ok(self
            .storage
            .read()
            .await
            .keys()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    async fn delete(&self, name: &str) -> SwResult<bool> {
        Ok(self.storage.write().await.delete(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse("https://example.com").unwrap().join(path).unwrap())
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("v1");
        cache.put(key("/style.css"), Response::ok("body{}"));

        assert!(cache.match_request(&key("/style.css")).is_some());
        assert!(cache.match_request(&key("/other.css")).is_none());
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();
        assert!(storage.get("v1").is_none());

        storage.open("v1");
        assert!(storage.get("v1").is_some());

        assert!(storage.delete("v1"));
        assert!(storage.get("v1").is_none());
        assert!(!storage.delete("v1"));
    }

    #[test]
    fn test_storage_keys_keep_creation_order() {
        let mut storage = CacheStorage::new();
        storage.open("b");
        storage.open("a");
        storage.open("b");
        assert_eq!(storage.keys(), vec!["b", "a"]);
    }

    #[test]
    fn test_match_across_generations_prefers_oldest() {
        let mut storage = CacheStorage::new();
        storage.open("v1").put(key("/app.js"), Response::ok("old"));
        storage.open("v2").put(key("/app.js"), Response::ok("new"));
        storage.open("v2").put(key("/only-new.js"), Response::ok("n"));

        assert_eq!(storage.match_request(&key("/app.js")).unwrap().body, "old");
        assert!(storage.match_request(&key("/only-new.js")).is_some());
    }

    #[tokio::test]
    async fn test_memory_store_put_all_and_match() {
        let store = MemoryCacheStore::new();
        store
            .put_all(
                "v1",
                vec![
                    (key("/"), Response::ok("home")),
                    (key("/index.html"), Response::ok("index")),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["v1"]);
        assert_eq!(
            store.match_in("v1", &key("/")).await.unwrap().unwrap().body,
            "home"
        );
        assert!(store.match_in("v2", &key("/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.json");

        let store = MemoryCacheStore::new();
        store.open("appvilla-cache-v0").await.unwrap();
        store
            .put_all(
                "appvilla-cache-v1",
                vec![(
                    key("/offline.html"),
                    Response::ok("<p>offline</p>").header("content-type", "text/html"),
                )],
            )
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let loaded = MemoryCacheStore::load(&path).await.unwrap();
        assert_eq!(
            loaded.keys().await.unwrap(),
            vec!["appvilla-cache-v0", "appvilla-cache-v1"]
        );
        let response = loaded
            .match_request(&key("/offline.html"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.body, "<p>offline</p>");
        assert_eq!(response.header_value("content-type"), Some("text/html"));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryCacheStore::load(&dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.json");
        std::fs::write(&path, "not json").unwrap();

        let err = MemoryCacheStore::load(&path).await.unwrap_err();
        assert_eq!(err.category(), "storage");
    }
}
