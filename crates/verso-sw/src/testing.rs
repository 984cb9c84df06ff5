//! Fake collaborators for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use url::Url;

use crate::error::{NetError, ServiceWorkerError};
use crate::notification::{Notification, NotificationSink};
use crate::request::{CacheMode, FetchRequest, Network, Response};

/// Scripted network: fixed routes, a call counter and an offline switch.
/// Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, (u16, Bytes)>>,
    calls: AtomicUsize,
    offline: AtomicBool,
    reloads: AtomicUsize,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: &str, status: u16, body: &'static str) -> Self {
        self.set_route(url, status, body);
        self
    }

    pub fn set_route(&self, url: &str, status: u16, body: &'static str) {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), (status, Bytes::from_static(body.as_bytes())));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches attempted, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of fetches made with [`CacheMode::Reload`].
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.cache_mode == CacheMode::Reload {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable("offline".into()));
        }
        let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let (status, body) = routes
            .get(request.url.as_str())
            .cloned()
            .unwrap_or((404, Bytes::new()));
        Ok(Response::new(request.url.clone(), status, body))
    }
}

/// Collects shown notifications.
#[derive(Debug, Default)]
pub struct RecordingSink {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn show(&self, notification: Notification) -> Result<(), ServiceWorkerError> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
        Ok(())
    }
}

/// Parse a URL literal in tests.
pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap_or_else(|e| panic!("bad test url {s}: {e}"))
}
