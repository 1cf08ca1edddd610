//! Fetch Interceptor.
//!
//! Cache first, then network, then the offline page. Responses fetched from
//! the network are returned as-is and never written back into the cache, and
//! only a thrown network error (not an error status) reaches the offline page.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::cache::CacheStore;
use crate::error::{ServiceWorkerError, SwResult};
use crate::host::NetworkFetch;
use crate::request::{Request, RequestKey, Response};

/// Where an intercepted request's response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Stored snapshot, returned verbatim.
    Cache(Response),
    /// Live network response after a cache miss.
    Network(Response),
    /// Offline page, served because the network threw.
    Offline(Response),
    /// Sent straight to the network without consulting the cache.
    Passthrough(Response),
}

impl FetchOutcome {
    pub fn response(&self) -> &Response {
        match self {
            Self::Cache(r) | Self::Network(r) | Self::Offline(r) | Self::Passthrough(r) => r,
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            Self::Cache(r) | Self::Network(r) | Self::Offline(r) | Self::Passthrough(r) => r,
        }
    }

    /// Short name of the source, used in logs and CLI output.
    pub fn source(&self) -> &'static str {
        match self {
            Self::Cache(_) => "cache",
            Self::Network(_) => "network",
            Self::Offline(_) => "offline",
            Self::Passthrough(_) => "passthrough",
        }
    }
}

/// Per-request cache-first decision logic.
pub struct FetchInterceptor {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn NetworkFetch>,
    offline_key: RequestKey,
}

impl FetchInterceptor {
    pub fn new(
        store: Arc<dyn CacheStore>,
        network: Arc<dyn NetworkFetch>,
        offline_key: RequestKey,
    ) -> Self {
        Self {
            store,
            network,
            offline_key,
        }
    }

    pub fn offline_key(&self) -> &RequestKey {
        &self.offline_key
    }

    /// Handle one request.
    ///
    /// Fails only when a non-GET request's network call throws, or when a GET
    /// cannot be answered by cache or network and the offline page is not cached.
    pub async fn handle(&self, request: &Request) -> SwResult<FetchOutcome> {
        if !request.is_cacheable() {
            trace!(method = %request.method, url = %request.url, "Passing through");
            return self.network.fetch(request).await.map(FetchOutcome::Passthrough);
        }

        match self.cache_then_network(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Request failed, trying offline page");
                self.offline_fallback().await
            }
        }
    }

    async fn cache_then_network(&self, request: &Request) -> SwResult<FetchOutcome> {
        let key = request.key();
        if let Some(response) = self.store.match_request(&key).await? {
            debug!(%key, "Cache hit");
            return Ok(FetchOutcome::Cache(response));
        }

        debug!(%key, "Cache miss, going to network");
        let response = self.network.fetch(request).await?;
        Ok(FetchOutcome::Network(response))
    }

    async fn offline_fallback(&self) -> SwResult<FetchOutcome> {
        match self.store.match_request(&self.offline_key).await {
            Ok(Some(page)) => Ok(FetchOutcome::Offline(page)),
            Ok(None) => Err(ServiceWorkerError::FallbackMissing(self.offline_key.url.clone())),
            Err(e) => {
                warn!(error = %e, "Offline page lookup failed");
                Err(ServiceWorkerError::FallbackMissing(self.offline_key.url.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::testing::StaticNetwork;
    use http::Method;
    use url::Url;

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:8080").unwrap().join(path).unwrap()
    }

    async fn setup(
        entries: &[(&str, &str)],
    ) -> (FetchInterceptor, Arc<MemoryCacheStore>, Arc<StaticNetwork>) {
        let store = Arc::new(MemoryCacheStore::new());
        let cached = entries
            .iter()
            .map(|(path, body)| (RequestKey::get(&url(path)), Response::ok(body.to_string())))
            .collect();
        store.put_all("appvilla-cache-v1", cached).await.unwrap();
        let network = Arc::new(StaticNetwork::new());
        let interceptor = FetchInterceptor::new(
            store.clone(),
            network.clone(),
            RequestKey::get(&url("/offline.html")),
        );
        (interceptor, store, network)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let (interceptor, _, network) = setup(&[("/index.html", "<cached>")]).await;
        network.route(url("/index.html"), Response::ok("<live>"));

        let outcome = interceptor.handle(&Request::get(url("/index.html"))).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Cache(Response::ok("<cached>")));
        assert!(network.calls().is_empty());
    }

    #[tokio::test]
    async fn test_miss_goes_to_network_without_write_back() {
        let (interceptor, store, network) = setup(&[]).await;
        network.route(url("/api/products?page=2"), Response::ok("[]"));

        let request = Request::get(url("/api/products?page=2"));
        let outcome = interceptor.handle(&request).await.unwrap();

        assert_eq!(outcome.source(), "network");
        assert_eq!(outcome.response().body, "[]");
        assert!(store.match_request(&request.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_status_is_not_offline() {
        let (interceptor, _, network) = setup(&[("/offline.html", "offline")]).await;
        network.route(url("/api/orders"), Response::new(500, "boom"));

        let outcome = interceptor.handle(&Request::get(url("/api/orders"))).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Network(Response::new(500, "boom")));
    }

    #[tokio::test]
    async fn test_thrown_network_error_serves_offline_page() {
        let (interceptor, _, network) = setup(&[("/offline.html", "you are offline")]).await;
        network.set_offline(true);

        let outcome = interceptor.handle(&Request::get(url("/products"))).await.unwrap();

        assert_eq!(outcome.source(), "offline");
        assert_eq!(outcome.into_response().body, "you are offline");
    }

    #[tokio::test]
    async fn test_missing_offline_page_fails() {
        let (interceptor, _, network) = setup(&[]).await;
        network.set_offline(true);

        let err = interceptor.handle(&Request::get(url("/products"))).await.unwrap_err();

        assert_eq!(
            err,
            ServiceWorkerError::FallbackMissing("http://localhost:8080/offline.html".into())
        );
    }

    #[tokio::test]
    async fn test_post_passes_through() {
        let (interceptor, _, network) = setup(&[("/api/orders", "cached?")]).await;
        network.route_method(Method::POST, url("/api/orders"), Response::new(201, "created"));

        let request = Request::new(Method::POST, url("/api/orders")).body("{}");
        let outcome = interceptor.handle(&request).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Passthrough(Response::new(201, "created")));
        assert_eq!(network.calls(), vec!["POST http://localhost:8080/api/orders"]);
    }

    #[tokio::test]
    async fn test_post_offline_surfaces_error() {
        let (interceptor, _, network) = setup(&[("/offline.html", "offline")]).await;
        network.set_offline(true);

        let request = Request::new(Method::POST, url("/api/orders"));
        let err = interceptor.handle(&request).await.unwrap_err();

        assert!(err.is_thrown_by_network());
    }
}
