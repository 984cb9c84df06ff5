//! Requests intercepted by the worker, the responses it serves, and the
//! network collaborator it fetches through.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::Method;
use url::Url;

use crate::cache::CacheEntry;
use crate::error::NetError;

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    SameOrigin,
    #[default]
    NoCors,
    Cors,
}

/// What the response will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR.
    #[default]
    Empty,
}

/// HTTP cache interaction for the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    /// Bypass HTTP caches and revalidate from the network.
    Reload,
    NoStore,
}

/// A request seen by the fetch handler.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub mode: RequestMode,
    pub destination: RequestDestination,
    pub cache_mode: CacheMode,
    pub client_id: Option<String>,
}

impl FetchRequest {
    /// A plain GET subresource request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HashMap::new(),
            mode: RequestMode::default(),
            destination: RequestDestination::default(),
            cache_mode: CacheMode::default(),
            client_id: None,
        }
    }

    /// A top-level navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: RequestDestination::Document,
            ..Self::get(url)
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// A response returned to the page, either live or rebuilt from a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: Url,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Response {
    pub fn new(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
        let status_text = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            url,
            status,
            status_text,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// 2xx status.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Only a plain `200 OK` is written to the cache; partial (206) and other
    /// 2xx responses are served but never stored.
    pub fn is_storable(&self) -> bool {
        self.status == 200
    }

    /// Rebuild a response from a stored entry.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            url: entry.url.clone(),
            status: entry.status,
            status_text: entry.status_text.clone(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// The cached root document, served in place of the requested page.
    ShellFallback,
}

/// Outbound network access for the worker.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request. A non-2xx status is a successful fetch; only
    /// transport failures are errors.
    async fn fetch(&self, request: &FetchRequest) -> Result<Response, NetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_request_is_document() {
        let url = Url::parse("https://verso.app/livros").unwrap();
        let request = FetchRequest::navigate(url);
        assert!(request.is_navigation());
        assert_eq!(request.destination, RequestDestination::Document);
        assert_eq!(request.method, Method::GET);
    }

    #[test]
    fn test_response_status_text() {
        let url = Url::parse("https://verso.app/").unwrap();
        assert_eq!(Response::new(url.clone(), 404, "").status_text, "Not Found");
        assert!(Response::new(url.clone(), 200, "").is_storable());
        assert!(Response::new(url.clone(), 204, "").ok());
        assert!(!Response::new(url, 206, "").is_storable());
    }

    #[test]
    fn test_header_names_are_lowercased() {
        let url = Url::parse("https://verso.app/").unwrap();
        let request = FetchRequest::get(url).with_header("Accept", "text/html");
        assert_eq!(request.headers.get("accept").map(String::as_str), Some("text/html"));
    }
}
