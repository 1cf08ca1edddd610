//! Requests, canonical request identities and response snapshots.

use std::fmt;

use bytes::Bytes;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// A page-issued request as seen by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a request with the given method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether the cache may answer this request. Only GET is intercepted.
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET
    }

    /// Canonical identity of this request.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// Canonical request identity: method plus URL, query included, fragment dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Identity of a GET for `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Immutable response snapshot, as returned by the network or stored in a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Bytes,
}

impl Response {
    /// Create a response with a status and body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        let status_text = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            status,
            status_text,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Create a 200 response.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value with the given name, case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_keeps_query_and_drops_fragment() {
        let url = Url::parse("https://example.com/a?b=1#section").unwrap();
        let key = RequestKey::get(&url);
        assert_eq!(key.url, "https://example.com/a?b=1");
        assert_eq!(key.method, "GET");
    }

    #[test]
    fn test_key_distinguishes_method() {
        let url = Url::parse("https://example.com/api/orders").unwrap();
        assert_ne!(
            Request::get(url.clone()).key(),
            Request::new(Method::POST, url).key()
        );
    }

    #[test]
    fn test_key_normalises_url() {
        let a = Url::parse("HTTPS://Example.com:443/./index.html").unwrap();
        let b = Url::parse("https://example.com/index.html").unwrap();
        assert_eq!(RequestKey::get(&a), RequestKey::get(&b));
    }

    #[test]
    fn test_only_get_is_cacheable() {
        let url = Url::parse("https://example.com/").unwrap();
        assert!(Request::get(url.clone()).is_cacheable());
        assert!(!Request::new(Method::POST, url.clone()).is_cacheable());
        assert!(!Request::new(Method::HEAD, url).is_cacheable());
    }

    #[test]
    fn test_response_status() {
        assert!(Response::ok("x").is_success());
        assert!(!Response::new(500, "").is_success());
        assert_eq!(Response::new(404, "").status_text, "Not Found");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = Response::ok("").header("Content-Type", "text/html");
        assert_eq!(response.header_value("content-type"), Some("text/html"));
        assert_eq!(response.header_value("etag"), None);
    }

    #[test]
    fn test_response_snapshot_serde() {
        let response = Response::ok("<h1>offline</h1>").header("content-type", "text/html");
        let json = serde_json::to_string(&response).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
    }
}
