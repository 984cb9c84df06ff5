//! Install and activate steps: bring a cache generation into existence and
//! retire the stale ones.
//!
//! Neither step fails towards the host. Storage and network problems are
//! logged, recorded in the report, and the step runs to completion.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::config::WorkerConfig;
use crate::request::{CacheMode, FetchRequest, Network};

/// One shell asset that could not be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of an install step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    pub stored: Vec<String>,
    pub failed: Vec<ShellFailure>,
}

impl InstallReport {
    /// Every shell asset made it into the cache.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of an activate step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub kept: String,
    pub deleted: Vec<String>,
    /// Buckets that could not be enumerated or deleted.
    pub errors: Vec<String>,
}

/// Cache lifecycle for one worker version.
pub struct CacheLifecycle {
    scope: Url,
    config: WorkerConfig,
    network: Arc<dyn Network>,
    caches: Arc<dyn CacheStore>,
}

impl CacheLifecycle {
    pub fn new(
        scope: Url,
        config: WorkerConfig,
        network: Arc<dyn Network>,
        caches: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            scope,
            config,
            network,
            caches,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    /// Pre-populate the current generation with the shell, revalidating
    /// every asset from the network. Partial shells are kept.
    pub async fn install(&self) -> InstallReport {
        let name = self.config.cache_name.as_str();
        let mut report = InstallReport {
            cache_name: name.to_string(),
            ..Default::default()
        };

        match self.caches.open(name).await {
            Ok(()) => debug!(cache = name, "Cache opened"),
            Err(e) => warn!(cache = name, error = %e, "Cache open failed"),
        }

        let urls = match self.config.shell_urls(&self.scope) {
            Ok(urls) => urls,
            Err(e) => {
                warn!(error = %e, "Shell manifest could not be resolved");
                report.failed.push(ShellFailure {
                    url: self.scope.to_string(),
                    reason: e.to_string(),
                });
                return report;
            }
        };

        let fetches = urls.into_iter().map(|url| async move {
            let request = FetchRequest::get(url).with_cache_mode(CacheMode::Reload);
            let result = self.network.fetch(&request).await;
            (request, result)
        });

        for (request, result) in join_all(fetches).await {
            let url = request.url.to_string();
            let response = match result {
                Ok(response) if response.ok() => response,
                Ok(response) => {
                    warn!(url = %url, status = response.status, "Shell asset not cached");
                    report.failed.push(ShellFailure {
                        url,
                        reason: format!("status {}", response.status),
                    });
                    continue;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Shell asset not cached");
                    report.failed.push(ShellFailure {
                        url,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let key = CacheKey::from_url(&request.url);
            match self
                .caches
                .put(name, key, CacheEntry::from_response(&response))
                .await
            {
                Ok(()) => report.stored.push(url),
                Err(e) => {
                    warn!(url = %url, error = %e, "Cache put failed");
                    report.failed.push(ShellFailure {
                        url,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            cache = name,
            stored = report.stored.len(),
            failed = report.failed.len(),
            "Shell install finished"
        );
        report
    }

    /// Delete every generation except the current one.
    pub async fn activate(&self) -> ActivateReport {
        let current = self.config.cache_name.as_str();
        let mut report = ActivateReport {
            kept: current.to_string(),
            ..Default::default()
        };

        let names = match self.caches.names().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list caches");
                report.errors.push(e.to_string());
                return report;
            }
        };

        for name in names.into_iter().filter(|n| n != current) {
            match self.caches.delete(&name).await {
                Ok(_) => {
                    info!(cache = %name, "Deleting old cache");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(cache = %name, error = %e, "Old cache delete failed");
                    report.errors.push(format!("{name}: {e}"));
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for CacheLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLifecycle")
            .field("scope", &self.scope.as_str())
            .field("cache_name", &self.config.cache_name)
            .finish_non_exhaustive()
    }
}
