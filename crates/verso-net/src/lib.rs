//! # Verso Net
//!
//! [`Network`] implementations for the cache worker: a reqwest client for
//! live origins and an always-offline stand-in.

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use reqwest::Client;
use tracing::{debug, info, trace};
use verso_sw::{CacheMode, FetchRequest, NetError, Network, Response};

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub user_agent: String,
    pub accept_language: String,
    /// Whole-request timeout; `None` leaves it to the HTTP stack.
    pub timeout: Option<Duration>,
    pub max_redirects: usize,
    pub cookies_enabled: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("Verso/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: "pt-BR,pt;q=0.9,en;q=0.8".to_string(),
            timeout: None,
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// Network backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
    config: NetworkConfig,
}

impl HttpNetwork {
    pub fn new(config: NetworkConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(config.cookies_enabled);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpNetwork initialized");
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, cache_mode = ?request.cache_mode, "Fetching");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .header("Accept-Language", &self.config.accept_language);

        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.cache_mode {
            CacheMode::Default => builder,
            CacheMode::Reload => builder
                .header("Cache-Control", "no-cache")
                .header("Pragma", "no-cache"),
            CacheMode::NoStore => builder.header("Cache-Control", "no-store"),
        };

        let response = builder.send().await.map_err(map_error)?;

        let status = response.status();
        let url = response.url().clone();
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else { continue };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let body = response.bytes().await.map_err(map_error)?;
        trace!(url = %url, status = %status, body_len = body.len(), "Response received");

        let mut out = Response::new(url, status.as_u16(), body);
        out.headers = headers;
        Ok(out)
    }
}

fn map_error(err: reqwest::Error) -> NetError {
    if err.is_builder() {
        NetError::InvalidUrl(err.to_string())
    } else if err.is_connect() || err.is_timeout() || err.is_request() {
        NetError::Unreachable(err.to_string())
    } else {
        NetError::RequestFailed(err.to_string())
    }
}

/// A network with no connectivity at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response, NetError> {
        trace!(url = %request.url, "Offline, refusing fetch");
        Err(NetError::Unreachable(format!("offline: {}", request.url)))
    }
}
