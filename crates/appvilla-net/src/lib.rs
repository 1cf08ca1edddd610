//! # AppVilla Net
//!
//! HTTP implementation of the offline agent's network contract.
//!
//! [`HttpFetcher`] sends a worker [`Request`] over a shared `reqwest::Client`
//! and snapshots the reply into a worker [`Response`]. Any HTTP status is a
//! successful fetch; only transport failures (refused connections, DNS,
//! timeouts) surface as errors, which the worker treats as "network threw".

use std::time::Duration;

use appvilla_sw::{NetworkFetch, Request, Response, ServiceWorkerError, SwResult};
use async_trait::async_trait;
use http::{HeaderName, HeaderValue};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for ServiceWorkerError {
    fn from(err: NetError) -> Self {
        ServiceWorkerError::network(err.to_string())
    }
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Enable cookies.
    pub cookies_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("AppVilla/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// [`NetworkFetch`] over HTTP.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(config.cookies_enabled)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Send a request and read the whole body.
    pub async fn send(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header("Accept-Language", &self.config.accept_language);

        for (name, value) in &request.headers {
            let invalid = |reason: String| NetError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            req_builder = req_builder.header(name, value);
        }

        if let Some(body) = &request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = match value.to_str() {
                    Ok(text) => text.to_string(),
                    Err(_) => {
                        trace!(header = %name, "Header value is not UTF-8, storing lossily");
                        String::from_utf8_lossy(value.as_bytes()).into_owned()
                    }
                };
                (name.as_str().to_string(), value)
            })
            .collect();

        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        trace!(
            url = %request.url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        let mut snapshot = Response::new(status.as_u16(), body);
        snapshot.headers = headers;
        Ok(snapshot)
    }

    fn classify(&self, err: reqwest::Error) -> NetError {
        if err.is_timeout() {
            NetError::Timeout(self.config.default_timeout)
        } else {
            NetError::HttpError(err)
        }
    }
}

#[async_trait]
impl NetworkFetch for HttpFetcher {
    async fn fetch(&self, request: &Request) -> SwResult<Response> {
        Ok(self.send(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;
    use wiremock::matchers::{body_string, header, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(LoaderConfig::default()).unwrap()
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&server.uri()).unwrap().join(p).unwrap()
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("AppVilla/"));
        assert_eq!(config.max_redirects, 10);
        assert!(config.cookies_enabled);
    }

    #[tokio::test]
    async fn test_fetch_snapshots_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/styles/main.css"))
            .and(headers("accept-language", vec!["en-US", "en;q=0.9"]))
            .respond_with(ResponseTemplate::new(200).set_body_raw("body{}", "text/css"))
            .expect(1)
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(&Request::get(url(&server, "/styles/main.css")))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.body, "body{}");
        assert_eq!(response.header_value("Content-Type"), Some("text/css"));
    }

    #[tokio::test]
    async fn test_non_utf8_header_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-origin", HeaderValue::from_bytes(b"caf\xe9").unwrap()),
            )
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(&Request::get(url(&server, "/")))
            .await
            .unwrap();

        assert_eq!(response.header_value("x-origin"), Some("caf\u{fffd}"));
    }

    #[tokio::test]
    async fn test_error_status_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let response = fetcher()
            .fetch(&Request::get(url(&server, "/api/orders")))
            .await
            .unwrap();

        assert_eq!(response.status, 500);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_post_sends_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/orders"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"sku":"A1"}"#))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let request = Request::new(Method::POST, url(&server, "/api/orders"))
            .header("content-type", "application/json")
            .body(r#"{"sku":"A1"}"#);
        let response = fetcher().fetch(&request).await.unwrap();

        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_refused_connection_is_thrown() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let target = Url::parse(&format!("http://{address}/index.html")).unwrap();
        drop(listener);

        let err = fetcher().fetch(&Request::get(target)).await.unwrap_err();

        assert!(err.is_thrown_by_network());
    }

    #[tokio::test]
    async fn test_timeout_is_thrown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(LoaderConfig {
            default_timeout: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap();
        let err = fetcher.send(&Request::get(url(&server, "/slow"))).await.unwrap_err();

        assert!(matches!(err, NetError::Timeout(_)));
        assert!(ServiceWorkerError::from(err).is_thrown_by_network());
    }

    #[tokio::test]
    async fn test_invalid_header_name() {
        let server = MockServer::start().await;
        let request = Request::get(url(&server, "/")).header("bad header", "x");

        let err = fetcher().send(&request).await.unwrap_err();

        assert!(matches!(err, NetError::InvalidHeader { .. }));
    }
}
