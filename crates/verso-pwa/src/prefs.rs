//! Persisted page flags.
//!
//! Values are stored as JSON text under string keys, so a timestamp written
//! as `1700000000000` or a flag written as `true` reads back unchanged.
//! Every read goes through a [`Setting`] that carries the key, the default
//! and a validity check; anything unreadable falls back to the default.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use verso_common::{Result, VersoError};

/// String key-value storage (the page's local storage).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Volatile store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Store backed by one JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store, starting empty if the file is missing or corrupt.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Settings file unreadable, starting empty");
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let failed =
            |e: std::io::Error| VersoError::storage_with_source(format!("saving {}", self.path.display()), e);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(failed)?;
        }
        let data = serde_json::to_string_pretty(values)?;

        // Write beside the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(failed)?;
        fs::rename(&tmp, &self.path).map_err(failed)?;
        debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }

    /// Apply `change` to a copy, and keep it only once it is on disk.
    fn commit(&self, change: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        let mut values = lock(&self.values);
        let mut next = values.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.save(&next)?;
        *values = next;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.commit(|values| {
            values.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.commit(|values| values.remove(key).is_some())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Schema of one persisted value.
pub struct Setting<T> {
    pub key: &'static str,
    pub default: T,
    pub validate: fn(&T) -> bool,
}

fn non_negative(ms: &i64) -> bool {
    *ms >= 0
}

fn any_bool(_: &bool) -> bool {
    true
}

fn optional_non_negative(ms: &Option<i64>) -> bool {
    ms.map_or(true, |ms| ms >= 0)
}

/// When the install prompt was last dismissed (ms since epoch, 0 = never).
pub const INSTALL_DISMISSED_AT: Setting<i64> = Setting {
    key: "pwa-install-dismissed",
    default: 0,
    validate: non_negative,
};

/// The app was installed through the install prompt.
pub const INSTALLED: Setting<bool> = Setting {
    key: "pwa-installed",
    default: false,
    validate: any_bool,
};

/// When the notification prompt was last answered (ms since epoch, 0 = never).
pub const NOTIFICATION_PROMPTED_AT: Setting<i64> = Setting {
    key: "notification-prompt-shown",
    default: 0,
    validate: non_negative,
};

/// Next daily reminder fire time (ms since epoch).
pub const NOTIFICATION_NEXT_FIRE: Setting<Option<i64>> = Setting {
    key: "notification-next-fire",
    default: None,
    validate: optional_non_negative,
};

/// Typed access to a [`KeyValueStore`].
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn KeyValueStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read a value. Missing, unparsable or invalid values yield the default.
    pub fn get<T>(&self, setting: &Setting<T>) -> T
    where
        T: DeserializeOwned + Clone,
    {
        let raw = match self.store.get(setting.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return setting.default.clone(),
            Err(e) => {
                warn!(key = setting.key, error = %e, category = e.category(), "Setting read failed, using default");
                return setting.default.clone();
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) if (setting.validate)(&value) => value,
            Ok(_) => {
                warn!(key = setting.key, raw = %raw, "Setting out of range, using default");
                setting.default.clone()
            }
            Err(e) => {
                warn!(key = setting.key, raw = %raw, error = %e, "Setting unparsable, using default");
                setting.default.clone()
            }
        }
    }

    pub fn set<T: Serialize>(&self, setting: &Setting<T>, value: &T) -> Result<()> {
        if !(setting.validate)(value) {
            return Err(VersoError::InvalidArgument(format!(
                "value rejected for {}",
                setting.key
            )));
        }
        let raw = serde_json::to_string(value)?;
        self.store.set(setting.key, &raw)
    }

    pub fn clear<T>(&self, setting: &Setting<T>) -> Result<()> {
        self.store.remove(setting.key)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}
