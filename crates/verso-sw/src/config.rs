//! Worker script configuration.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ServiceWorkerError;

/// Cache bucket name. Bumping it is the only way to invalidate the shell.
pub const CACHE_NAME: &str = "verso-diario-v1";

/// Assets pre-fetched at install.
pub const SHELL_ASSETS: &[&str] = &[
    "/",
    "/static/js/bundle.js",
    "/static/css/main.css",
    "/manifest.json",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
];

/// Everything a worker script version carries. Two workers with equal
/// configs are the same script; a different config is an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Version-stamped bucket name.
    pub cache_name: String,

    /// Shell manifest, relative to the worker scope.
    pub shell: Vec<String>,

    /// Path substring marking backend calls.
    pub api_marker: String,

    /// Root document served when navigation fails offline.
    pub shell_fallback: String,

    /// Activate right after install instead of waiting for a take-over message.
    pub skip_waiting: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: CACHE_NAME.to_string(),
            shell: SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
            api_marker: "/api/".to_string(),
            shell_fallback: "/".to_string(),
            skip_waiting: true,
        }
    }
}

impl WorkerConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Same script with a different version stamp.
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    pub fn with_shell<I, S>(mut self, shell: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell = shell.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
        self.skip_waiting = skip_waiting;
        self
    }

    /// Resolve the shell manifest against the worker scope.
    pub fn shell_urls(&self, scope: &Url) -> Result<Vec<Url>, ServiceWorkerError> {
        self.shell.iter().map(|path| resolve(scope, path)).collect()
    }

    pub fn fallback_url(&self, scope: &Url) -> Result<Url, ServiceWorkerError> {
        resolve(scope, &self.shell_fallback)
    }
}

fn resolve(scope: &Url, path: &str) -> Result<Url, ServiceWorkerError> {
    scope
        .join(path)
        .map_err(|e| ServiceWorkerError::ScriptError(format!("bad shell path {path}: {e}")))
}
