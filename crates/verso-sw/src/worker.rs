//! The cache worker: one instance per installed script version.
//!
//! Event handlers return what the host has to do next instead of reaching
//! into the host; only network and cache I/O happen here.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::config::WorkerConfig;
use crate::error::{DispatchError, ServiceWorkerError};
use crate::lifecycle::{ActivateReport, CacheLifecycle, InstallReport};
use crate::message::WorkerMessage;
use crate::notification::Notification;
use crate::policy::{Directive, DispatchState, FetchPolicy, RequestClass};
use crate::request::{FetchRequest, Network, Response, ResponseSource};

/// Tag acknowledged by the background sync handler.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Result of the fetch handler.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs the request itself.
    Passthrough,
    Respond {
        response: Response,
        source: ResponseSource,
    },
    /// Surfaced to the page as a network error.
    Failed(DispatchError),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            FetchOutcome::Respond { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Result of the install handler.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub report: InstallReport,
    /// Ask the host to activate without waiting for clients to close.
    pub skip_waiting: bool,
}

/// Result of the activate handler.
#[derive(Debug, Clone)]
pub struct ActivateOutcome {
    pub report: ActivateReport,
    /// Take control of every open client right away.
    pub claim_clients: bool,
}

/// What the host should do after a posted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    SkipWaiting,
    /// Relay to controlled clients.
    Broadcast(WorkerMessage),
    /// Not a message this worker understands.
    Ignored,
}

/// What the host should do after a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    OpenWindow(Url),
}

pub struct CacheWorker {
    scope: Url,
    config: WorkerConfig,
    policy: FetchPolicy,
    lifecycle: CacheLifecycle,
    network: Arc<dyn Network>,
    caches: Arc<dyn CacheStore>,
    writes: TaskTracker,
}

impl CacheWorker {
    pub fn new(
        scope: Url,
        config: WorkerConfig,
        network: Arc<dyn Network>,
        caches: Arc<dyn CacheStore>,
    ) -> Result<Self, ServiceWorkerError> {
        let policy = FetchPolicy::new(&scope, &config)?;
        let lifecycle = CacheLifecycle::new(
            scope.clone(),
            config.clone(),
            Arc::clone(&network),
            Arc::clone(&caches),
        );
        Ok(Self {
            scope,
            config,
            policy,
            lifecycle,
            network,
            caches,
            writes: TaskTracker::new(),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    pub async fn on_install(&self) -> InstallOutcome {
        InstallOutcome {
            report: self.lifecycle.install().await,
            skip_waiting: self.config.skip_waiting,
        }
    }

    pub async fn on_activate(&self) -> ActivateOutcome {
        ActivateOutcome {
            report: self.lifecycle.activate().await,
            claim_clients: true,
        }
    }

    /// Serve one intercepted request.
    pub async fn on_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let class = self.policy.classify(request);
        if let RequestClass::Passthrough(reason) = class {
            trace!(url = %request.url, ?reason, "Not intercepted");
            return FetchOutcome::Passthrough;
        }

        let mut state = DispatchState::Start;
        loop {
            state = match self.policy.step(request, class, state) {
                Directive::Passthrough => return FetchOutcome::Passthrough,
                Directive::Fetch => DispatchState::NetworkSettled(self.network.fetch(request).await),
                Directive::ProbeCache { key, cause } => DispatchState::CacheProbed {
                    cached: self.lookup(&key).await,
                    cause,
                },
                Directive::ProbeFallback { key, cause } => DispatchState::FallbackProbed {
                    cached: self.lookup(&key).await,
                    cause,
                },
                Directive::Respond {
                    response,
                    source,
                    store,
                } => {
                    if let Some(key) = store {
                        self.store_detached(key, &response);
                    }
                    debug!(url = %request.url, ?class, ?source, status = response.status, "Served");
                    return FetchOutcome::Respond { response, source };
                }
                Directive::Fail(err) => {
                    debug!(url = %request.url, ?class, error = %err, "Request failed");
                    return FetchOutcome::Failed(err);
                }
            };
        }
    }

    /// Handle a posted JSON message.
    pub fn on_message(&self, data: &str) -> MessageOutcome {
        match WorkerMessage::parse(data) {
            Some(WorkerMessage::SkipWaiting) => {
                info!(cache = self.cache_name(), "Take-over requested");
                MessageOutcome::SkipWaiting
            }
            Some(other) => MessageOutcome::Broadcast(other),
            None => MessageOutcome::Ignored,
        }
    }

    pub fn on_push(&self, payload: Option<&str>) -> Notification {
        Notification::push(payload)
    }

    pub fn on_notification_click(&self, notification: &Notification) -> ClickOutcome {
        let target = notification.target_url();
        let url = self
            .scope
            .join(target)
            .unwrap_or_else(|_| self.scope.clone());
        ClickOutcome::OpenWindow(url)
    }

    /// Returns whether the tag was recognised.
    pub fn on_sync(&self, tag: &str) -> bool {
        if tag == BACKGROUND_SYNC_TAG {
            info!("Background sync triggered");
            true
        } else {
            debug!(tag, "Ignoring unknown sync tag");
            false
        }
    }

    /// Wait for detached cache writes issued so far.
    pub async fn settle(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Response> {
        match self.caches.lookup(self.cache_name(), key).await {
            Ok(entry) => entry.map(|e| e.to_response()),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    fn store_detached(&self, key: CacheKey, response: &Response) {
        let entry = CacheEntry::from_response(response);
        let caches = Arc::clone(&self.caches);
        let name = self.config.cache_name.clone();
        self.writes.spawn(async move {
            if let Err(e) = caches.put(&name, key.clone(), entry).await {
                warn!(cache = %name, key = %key, error = %e, "Cache write failed");
            }
        });
    }
}

impl std::fmt::Debug for CacheWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWorker")
            .field("scope", &self.scope.as_str())
            .field("cache_name", &self.config.cache_name)
            .field("pending_writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}
