//! Fetch dispatch policy.
//!
//! The policy never performs I/O. The worker feeds it the outcome of each
//! step it asked for and gets back the next [`Directive`]:
//!
//! ```text
//! Api         Start → Fetch → 200: Respond(store) | other: Respond
//!                           → error: ProbeCache → hit: Respond | miss: Fail
//! Navigation  Start → Fetch → ok: Respond
//!                           → error: ProbeFallback("/") → hit: Respond | miss: Fail
//! Asset       Start → ProbeCache → hit: Respond
//!                                → miss: Fetch → 200: Respond(store) | other: Respond
//!                                              → error: document? ProbeFallback : Fail
//! ```

use http::Method;
use url::{Origin, Url};

use crate::cache::CacheKey;
use crate::config::WorkerConfig;
use crate::error::{DispatchError, NetError, ServiceWorkerError};
use crate::request::{FetchRequest, RequestDestination, Response, ResponseSource};

/// How a request is handled, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Not intercepted; the page talks to the network directly.
    Passthrough(PassReason),
    /// Backend call: network-first, cache as fallback.
    Api,
    /// Top-level document: network-first, shell as fallback.
    Navigation,
    /// Static asset: cache-first.
    Asset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    CrossOrigin,
    /// Only GET has a cache identity.
    NonGet,
}

/// What the worker has learned so far while serving one request.
#[derive(Debug)]
pub enum DispatchState {
    Start,
    /// Result of looking the request identity up in the current generation.
    /// `cause` is set when the probe follows a failed fetch.
    CacheProbed {
        cached: Option<Response>,
        cause: Option<NetError>,
    },
    NetworkSettled(Result<Response, NetError>),
    /// Result of looking the shell document up.
    FallbackProbed {
        cached: Option<Response>,
        cause: NetError,
    },
}

/// Next step the worker must take.
#[derive(Debug)]
pub enum Directive {
    Passthrough,
    ProbeCache {
        key: CacheKey,
        cause: Option<NetError>,
    },
    Fetch,
    ProbeFallback { key: CacheKey, cause: NetError },
    Respond {
        response: Response,
        source: ResponseSource,
        /// Write a copy under this identity without delaying the response.
        store: Option<CacheKey>,
    },
    Fail(DispatchError),
}

/// Classification and step rules for one worker scope.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    origin: Origin,
    api_marker: String,
    shell_key: CacheKey,
}

impl FetchPolicy {
    pub fn new(scope: &Url, config: &WorkerConfig) -> Result<Self, ServiceWorkerError> {
        Ok(Self {
            origin: scope.origin(),
            api_marker: config.api_marker.clone(),
            shell_key: CacheKey::from_url(&config.fallback_url(scope)?),
        })
    }

    pub fn shell_key(&self) -> &CacheKey {
        &self.shell_key
    }

    pub fn classify(&self, request: &FetchRequest) -> RequestClass {
        if request.url.origin() != self.origin {
            return RequestClass::Passthrough(PassReason::CrossOrigin);
        }
        if request.method != Method::GET {
            return RequestClass::Passthrough(PassReason::NonGet);
        }
        if request.url.path().contains(&self.api_marker) {
            return RequestClass::Api;
        }
        if request.is_navigation() {
            return RequestClass::Navigation;
        }
        RequestClass::Asset
    }

    /// Advance the dispatch of `request` by one step.
    pub fn step(&self, request: &FetchRequest, class: RequestClass, state: DispatchState) -> Directive {
        match class {
            RequestClass::Passthrough(_) => Directive::Passthrough,
            RequestClass::Api => self.step_api(request, state),
            RequestClass::Navigation => self.step_navigation(state),
            RequestClass::Asset => self.step_asset(request, state),
        }
    }

    fn step_api(&self, request: &FetchRequest, state: DispatchState) -> Directive {
        match state {
            DispatchState::Start => Directive::Fetch,
            DispatchState::NetworkSettled(Ok(response)) => network_response(request, response),
            DispatchState::NetworkSettled(Err(cause)) => Directive::ProbeCache {
                key: CacheKey::from_url(&request.url),
                cause: Some(cause),
            },
            DispatchState::CacheProbed {
                cached: Some(response),
                ..
            } => Directive::Respond {
                response,
                source: ResponseSource::Cache,
                store: None,
            },
            DispatchState::CacheProbed {
                cached: None,
                cause: Some(cause),
            } => Directive::Fail(DispatchError::Uncached {
                url: request.url.to_string(),
                source: cause,
            }),
            DispatchState::CacheProbed { cause: None, .. } => {
                Directive::Fail(DispatchError::UnexpectedState("api probe before fetch"))
            }
            DispatchState::FallbackProbed { .. } => {
                Directive::Fail(DispatchError::UnexpectedState("api fallback"))
            }
        }
    }

    fn step_navigation(&self, state: DispatchState) -> Directive {
        match state {
            DispatchState::Start => Directive::Fetch,
            DispatchState::NetworkSettled(Ok(response)) => Directive::Respond {
                response,
                source: ResponseSource::Network,
                store: None,
            },
            DispatchState::NetworkSettled(Err(cause)) => Directive::ProbeFallback {
                key: self.shell_key.clone(),
                cause,
            },
            DispatchState::FallbackProbed { cached, cause } => shell_or_fail(cached, cause),
            DispatchState::CacheProbed { .. } => {
                Directive::Fail(DispatchError::UnexpectedState("navigation cache probe"))
            }
        }
    }

    fn step_asset(&self, request: &FetchRequest, state: DispatchState) -> Directive {
        match state {
            DispatchState::Start => Directive::ProbeCache {
                key: CacheKey::from_url(&request.url),
                cause: None,
            },
            DispatchState::CacheProbed {
                cached: Some(response),
                ..
            } => Directive::Respond {
                response,
                source: ResponseSource::Cache,
                store: None,
            },
            DispatchState::CacheProbed { cached: None, .. } => Directive::Fetch,
            DispatchState::NetworkSettled(Ok(response)) => network_response(request, response),
            DispatchState::NetworkSettled(Err(cause)) => {
                if request.destination == RequestDestination::Document {
                    Directive::ProbeFallback {
                        key: self.shell_key.clone(),
                        cause,
                    }
                } else {
                    Directive::Fail(DispatchError::Uncached {
                        url: request.url.to_string(),
                        source: cause,
                    })
                }
            }
            DispatchState::FallbackProbed { cached, cause } => shell_or_fail(cached, cause),
        }
    }
}

fn network_response(request: &FetchRequest, response: Response) -> Directive {
    let store = response
        .is_storable()
        .then(|| CacheKey::from_url(&request.url));
    Directive::Respond {
        response,
        source: ResponseSource::Network,
        store,
    }
}

fn shell_or_fail(cached: Option<Response>, cause: NetError) -> Directive {
    match cached {
        Some(response) => Directive::Respond {
            response,
            source: ResponseSource::ShellFallback,
            store: None,
        },
        None => Directive::Fail(DispatchError::NoShell { source: cause }),
    }
}
