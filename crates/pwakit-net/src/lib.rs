//! # PwaKit Net
//!
//! Request/response model and the network seam for the PwaKit offline engine.
//!
//! ## Design Goals
//!
//! 1. **One seam**: everything that reaches the origin goes through [`Network`]
//! 2. **Verbatim statuses**: HTTP error statuses are responses, not errors
//! 3. **Observed connectivity**: [`Connectivity`] is read, never owned, by the core
//! 4. **Testability**: [`MockNetwork`] scripts and records traffic

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};

pub use url::Url;

pub mod connectivity;
pub mod mock;
pub mod pattern;

pub use connectivity::Connectivity;
pub use mock::{MockNetwork, MockReply, RecordedRequest};
pub use pattern::{PatternType, UrlPattern};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl NetError {
    /// Create a network unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::NetworkUnavailable(message.into())
    }
}

/// An intercepted or outgoing HTTP request.
///
/// The body is an immutable buffer, so it can be read any number of times.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a request with the given method and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    /// Create a DELETE request.
    pub fn delete(url: Url) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Attach a body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the method only reads state.
    pub fn is_read_only(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// The body decoded as text; empty when there is no body.
    pub fn body_text(&self) -> String {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    /// Fetched from the origin.
    #[default]
    Network,
    /// Served from a resource cache.
    Cache,
    /// Built locally as an offline fallback.
    Synthetic,
}

/// An HTTP response with its body fully read.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Option<Url>,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    /// Create a network response.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    /// Create a locally built response.
    pub fn synthetic(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            source: ResponseSource::Synthetic,
            ..Self::new(status, body)
        }
    }

    /// Create a `302 Found` redirect to `location`.
    pub fn redirect(location: &Url) -> Self {
        let mut response = Self::synthetic(StatusCode::FOUND, Bytes::new());
        if let Ok(value) = HeaderValue::from_str(location.as_str()) {
            response.headers.insert(header::LOCATION, value);
        }
        response
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// The body decoded as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The `Location` header, if any.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    pub fn is_from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }
}

/// The network as seen by the offline engine.
///
/// Implementations return `Ok` for every response the origin produced,
/// whatever its status, and `Err` only when no response was obtained.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout. `None` leaves it to the platform.
    pub timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("PwaKit/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
            max_redirects: 10,
        }
    }
}

/// [`Network`] backed by a reqwest client.
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    /// Create a new HTTP network.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpNetwork initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                NetError::unavailable(e.to_string())
            } else if e.is_builder() {
                NetError::InvalidUrl(e.to_string())
            } else {
                NetError::Http(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url: Some(url),
            status,
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/total").unwrap();
        let request = Request::post(url.clone(), "5").header(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("text/plain"),
        );

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body_text(), "5");
        assert!(request.headers.contains_key("content-type"));
        assert!(!request.is_read_only());
    }

    #[test]
    fn test_read_only_methods() {
        let url = Url::parse("https://example.com/").unwrap();
        assert!(Request::get(url.clone()).is_read_only());
        assert!(!Request::delete(url).is_read_only());
    }

    #[test]
    fn test_redirect_response() {
        let target = Url::parse("http://localhost:3000/images/avatar.jpg").unwrap();
        let response = Response::redirect(&target);

        assert_eq!(response.status, StatusCode::FOUND);
        assert_eq!(response.location(), Some(target.as_str()));
        assert_eq!(response.source, ResponseSource::Synthetic);
    }

    #[test]
    fn test_body_text_empty_without_body() {
        let request = Request::get(Url::parse("https://example.com/").unwrap());
        assert_eq!(request.body_text(), "");
    }

    #[tokio::test]
    async fn test_http_network_rejects_non_http_scheme() {
        let network = HttpNetwork::new(LoaderConfig::default()).unwrap();
        let url = Url::parse("file:///tmp/total").unwrap();

        let result = network.fetch(&Request::get(url)).await;
        assert!(matches!(result, Err(NetError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_http_network_returns_error_statuses_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&server)
            .await;

        let network = HttpNetwork::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let response = network.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "nope");
    }

    #[tokio::test]
    async fn test_http_network_sends_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/total"))
            .and(body_string("5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("5"))
            .expect(1)
            .mount(&server)
            .await;

        let network = HttpNetwork::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/total", server.uri())).unwrap();
        let response = network.fetch(&Request::post(url, "5")).await.unwrap();

        assert!(response.ok());
        assert_eq!(response.text(), "5");
    }
}
