//! # Verso Service Worker
//!
//! Offline caching worker for the Verso Diário web app.
//!
//! ## Features
//!
//! - **Shell install**: pre-populate a version-stamped cache generation
//! - **Activation**: delete every stale generation
//! - **Fetch dispatch**: network-first for API and navigations, cache-first
//!   for static assets, shell fallback when offline
//! - **Messaging**: take-over requests and update announcements
//! - **Push / notification click / background sync** handlers
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (host)
//!     │
//!     └── ServiceWorkerRegistration (scope)
//!             ├── installing ─┐
//!             ├── waiting     ├── ServiceWorker ── CacheWorker
//!             └── active     ─┘                      ├── FetchPolicy   (pure)
//!                                                    └── CacheLifecycle
//!
//! Network     (injected)  FetchRequest → Response
//! CacheStore  (injected)  bucket name → CacheKey → CacheEntry
//! ```

pub mod cache;
pub mod config;
pub mod container;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod notification;
pub mod policy;
pub mod registration;
pub mod request;
pub mod worker;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cache::{Cache, CacheEntry, CacheKey, CacheStore, MemoryCacheStore};
pub use config::{WorkerConfig, CACHE_NAME, SHELL_ASSETS};
pub use container::{
    RegistrationOptions, ScriptSource, ServiceWorkerContainer, ServiceWorkerEvent, StaticScript,
    UpdateResult,
};
pub use error::{CacheError, DispatchError, NetError, ServiceWorkerError};
pub use lifecycle::{ActivateReport, CacheLifecycle, InstallReport, ShellFailure};
pub use message::WorkerMessage;
pub use notification::{Notification, NotificationAction, NotificationData, NotificationSink};
pub use policy::{Directive, DispatchState, FetchPolicy, PassReason, RequestClass};
pub use registration::{
    RegistrationInfo, ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration,
    ServiceWorkerState, WorkerInfo, WorkerSlot,
};
pub use request::{
    CacheMode, FetchRequest, Network, RequestDestination, RequestMode, Response, ResponseSource,
};
pub use worker::{
    ActivateOutcome, CacheWorker, ClickOutcome, FetchOutcome, InstallOutcome, MessageOutcome,
    BACKGROUND_SYNC_TAG,
};
