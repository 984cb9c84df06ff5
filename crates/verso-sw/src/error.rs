//! Error types for the cache worker and its collaborators.

use thiserror::Error;
use verso_common::VersoError;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Script error: {0}")]
    ScriptError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Failure reported by a [`Network`](crate::Network) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// The host could not be reached (offline, DNS, refused, reset).
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

/// Failure reported by a [`CacheStore`](crate::CacheStore) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache storage is disabled")]
    Disabled,

    #[error("Quota exceeded for cache {0}")]
    QuotaExceeded(String),

    #[error("Cache backend failure: {0}")]
    Backend(String),
}

/// Failure surfaced to the page when no fallback applies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Network failed and nothing is cached for {url}")]
    Uncached {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Network failed and the shell document is not cached")]
    NoShell {
        #[source]
        source: NetError,
    },

    #[error("Unexpected dispatch state: {0}")]
    UnexpectedState(&'static str),
}

impl From<ServiceWorkerError> for VersoError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::NotFound(what) => VersoError::NotFound(what),
            ServiceWorkerError::StateError(msg) => VersoError::State(msg),
            other => VersoError::internal(other.to_string()),
        }
    }
}

impl From<NetError> for VersoError {
    fn from(err: NetError) -> Self {
        VersoError::network_with_source("fetch failed", err)
    }
}

impl From<CacheError> for VersoError {
    fn from(err: CacheError) -> Self {
        VersoError::cache_with_source("cache operation failed", err)
    }
}

impl From<DispatchError> for VersoError {
    fn from(err: DispatchError) -> Self {
        VersoError::network_with_source("request could not be served", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_verso_error_categories() {
        let err: VersoError = NetError::Unreachable("offline".into()).into();
        assert_eq!(err.category(), "network");

        let err: VersoError = CacheError::Disabled.into();
        assert_eq!(err.category(), "cache");

        let err: VersoError = ServiceWorkerError::NotFound("scope".into()).into();
        assert_eq!(err.category(), "not_found");
    }
}
