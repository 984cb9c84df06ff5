//! Cache generations and the storage collaborator that holds them.
//!
//! ```text
//! CacheStore
//!     └── Cache (one generation, named by the version stamp)
//!             └── CacheKey → CacheEntry
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

use crate::error::CacheError;
use crate::request::Response;

/// Request identity: the full URL without its fragment, GET semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored response bound to a request identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: Url,
    pub method: String,
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// Milliseconds since the epoch.
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response in full.
    pub fn from_response(response: &Response) -> Self {
        let cached_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            url: response.url.clone(),
            method: Method::GET.to_string(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at,
        }
    }

    pub fn to_response(&self) -> Response {
        Response::from_entry(self)
    }
}

/// One cache generation.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    pub name: String,
    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or overwrite wholesale. Returns true if a previous entry was replaced.
    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) -> bool {
        self.entries.insert(key, entry).is_some()
    }

    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Named cache buckets, the worker's only persistent state.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a bucket, creating it if absent.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Names of all buckets.
    async fn names(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a bucket. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Store an entry, creating the bucket if absent. Last write wins.
    async fn put(&self, name: &str, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError>;

    /// Look an identity up in one bucket.
    async fn lookup(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Identities stored in one bucket (empty if the bucket does not exist).
    async fn keys(&self, name: &str) -> Result<Vec<CacheKey>, CacheError>;
}

/// In-process cache storage with an optional per-bucket entry quota.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<String, Cache>>,
    max_entries: Option<usize>,
    disabled: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit each bucket to `max_entries`; puts beyond it fail with
    /// [`CacheError::QuotaExceeded`]. Overwrites never count against it.
    pub fn with_quota(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::default()
        }
    }

    /// Simulate storage being switched off (private mode, user setting).
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    /// Snapshot of a bucket.
    pub async fn snapshot(&self, name: &str) -> Option<Cache> {
        self.caches.read().await.get(name).cloned()
    }

    fn check_enabled(&self) -> Result<(), CacheError> {
        if self.disabled.load(Ordering::SeqCst) {
            Err(CacheError::Disabled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.check_enabled()?;
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>, CacheError> {
        self.check_enabled()?;
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.check_enabled()?;
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn put(&self, name: &str, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        self.check_enabled()?;
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));

        if let Some(max) = self.max_entries {
            if !cache.contains(&key) && cache.len() >= max {
                return Err(CacheError::QuotaExceeded(name.to_string()));
            }
        }

        trace!(cache = name, key = %key, status = entry.status, "Cache put");
        cache.put(key, entry);
        Ok(())
    }

    async fn lookup(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        self.check_enabled()?;
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn keys(&self, name: &str) -> Result<Vec<CacheKey>, CacheError> {
        self.check_enabled()?;
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .map(Cache::keys)
            .unwrap_or_default())
    }
}
