//! Worker configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ServiceWorkerError, SwResult};
use crate::request::RequestKey;

/// Configuration injected into a worker at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the cache generation this worker installs and keeps.
    pub cache_name: String,

    /// Base URL that manifest paths, the offline page and notification targets resolve against.
    pub origin: Url,

    /// Application shell primed at install time.
    pub manifest: Vec<String>,

    /// Document served when a GET misses the cache and the network throws.
    pub offline_page: String,

    /// Background sync tag that triggers a deferred replay.
    pub sync_tag: String,

    /// Notification rendering defaults.
    pub notifications: NotificationDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
    /// Grouping tag; a new push replaces the previous notification with this tag.
    pub tag: String,
    /// Click target when the payload carries none.
    pub url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: "appvilla-cache-v1".to_string(),
            origin: default_origin(),
            manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/styles/main.css".to_string(),
                "/scripts/app.js".to_string(),
                "/icons/icon-192x192.png".to_string(),
            ],
            offline_page: "/offline.html".to_string(),
            sync_tag: "sync-new-order".to_string(),
            notifications: NotificationDefaults::default(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "AppVilla Update".to_string(),
            body: "New content is available!".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/badge-72x72.png".to_string(),
            vibrate: vec![200, 100, 200],
            tag: "appvilla-notification-tag".to_string(),
            url: "/".to_string(),
        }
    }
}

fn default_origin() -> Url {
    Url::parse("http://localhost:8080/").expect("static origin URL is valid")
}

impl WorkerConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> SwResult<Self> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::config(e.to_string()))
    }

    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> SwResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Use a different generation name.
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Use a different origin.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = origin;
        self
    }

    /// Use a different shell manifest.
    pub fn with_manifest<I, S>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    /// Check that every field is usable.
    pub fn validate(&self) -> SwResult<()> {
        if self.cache_name.trim().is_empty() {
            return Err(ServiceWorkerError::config("cache_name must not be empty"));
        }
        if self.sync_tag.trim().is_empty() {
            return Err(ServiceWorkerError::config("sync_tag must not be empty"));
        }
        if self.origin.cannot_be_a_base() {
            return Err(ServiceWorkerError::config(format!(
                "origin {} cannot be used as a base URL",
                self.origin
            )));
        }
        self.manifest_urls()?;
        self.resolve(&self.offline_page)?;
        self.resolve(&self.notifications.url)?;
        Ok(())
    }

    /// Resolve a path (or absolute URL) against the origin.
    pub fn resolve(&self, path: &str) -> SwResult<Url> {
        self.origin.join(path).map_err(|e| {
            ServiceWorkerError::config(format!(
                "cannot resolve '{path}' against {}: {e}",
                self.origin
            ))
        })
    }

    /// Absolute URLs of the shell manifest, in order.
    pub fn manifest_urls(&self) -> SwResult<Vec<Url>> {
        self.manifest.iter().map(|path| self.resolve(path)).collect()
    }

    /// Cache key of the offline fallback document.
    pub fn offline_key(&self) -> SwResult<RequestKey> {
        Ok(RequestKey::get(&self.resolve(&self.offline_page)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.cache_name, "appvilla-cache-v1");
        assert_eq!(config.manifest.len(), 5);
        assert_eq!(config.offline_page, "/offline.html");
        assert_eq!(config.sync_tag, "sync-new-order");
        assert_eq!(config.notifications.vibrate, vec![200, 100, 200]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = WorkerConfig::from_json(
            r#"{ "cache_name": "appvilla-cache-v2", "notifications": { "title": "Hi" } }"#,
        )
        .unwrap();

        assert_eq!(config.cache_name, "appvilla-cache-v2");
        assert_eq!(config.notifications.title, "Hi");
        assert_eq!(config.notifications.body, "New content is available!");
        assert_eq!(config.sync_tag, "sync-new-order");
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = WorkerConfig::from_json("{ nope").unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_empty_cache_name_rejected() {
        let config = WorkerConfig::default().with_cache_name("  ");
        assert!(matches!(config.validate(), Err(ServiceWorkerError::Config(_))));
    }

    #[test]
    fn test_resolve_paths_against_origin() {
        let config = WorkerConfig::default()
            .with_origin(Url::parse("https://shop.example/app/").unwrap());

        assert_eq!(
            config.resolve("/index.html").unwrap().as_str(),
            "https://shop.example/index.html"
        );
        assert_eq!(
            config.resolve("styles/main.css").unwrap().as_str(),
            "https://shop.example/app/styles/main.css"
        );
    }

    #[test]
    fn test_offline_key() {
        let key = WorkerConfig::default().offline_key().unwrap();
        assert_eq!(key.url, "http://localhost:8080/offline.html");
        assert_eq!(key.method, "GET");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");
        std::fs::write(&path, r#"{ "manifest": ["/", "/app.js"] }"#).unwrap();

        let config = WorkerConfig::load(&path).unwrap();
        assert_eq!(config.manifest, vec!["/", "/app.js"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = WorkerConfig::load(Path::new("/nonexistent/worker.json")).unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Config(_)));
    }
}
