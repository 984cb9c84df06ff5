//! Worker instances and the per-scope registration that holds them.
//!
//! ```text
//! ServiceWorkerRegistration (scope)
//!     ├── installing (ServiceWorker)
//!     ├── waiting    (ServiceWorker)
//!     └── active     (ServiceWorker)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ServiceWorkerError;
use crate::worker::CacheWorker;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Script loaded, nothing run yet.
    #[default]
    Parsed,
    Installing,
    /// Installed, waiting to take over.
    Installed,
    Activating,
    /// Controlling fetches.
    Activated,
    /// Replaced or unregistered.
    Redundant,
}

/// Which worker of a registration a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSlot {
    Installing,
    Waiting,
    Active,
}

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub script_url: Url,
    pub state: ServiceWorkerState,
    runtime: Arc<CacheWorker>,
}

impl ServiceWorker {
    pub fn new(script_url: Url, runtime: Arc<CacheWorker>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            runtime,
        }
    }

    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    /// The running worker. Fails once the worker is redundant.
    pub fn runtime(&self) -> Result<Arc<CacheWorker>, ServiceWorkerError> {
        if self.is_redundant() {
            return Err(ServiceWorkerError::StateError(
                "worker is redundant".to_string(),
            ));
        }
        Ok(Arc::clone(&self.runtime))
    }
}

/// Public view of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: ServiceWorkerId,
    pub state: ServiceWorkerState,
}

impl From<&ServiceWorker> for WorkerInfo {
    fn from(worker: &ServiceWorker) -> Self {
        Self {
            id: worker.id,
            state: worker.state,
        }
    }
}

/// Snapshot of a registration for the page side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub scope: String,
    pub script_url: Url,
    pub installing: Option<WorkerInfo>,
    pub waiting: Option<WorkerInfo>,
    pub active: Option<WorkerInfo>,
}

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    pub scope: Url,
    pub script_url: Url,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    pub fn new(scope: Url, script_url: Url) -> Self {
        Self {
            scope,
            script_url,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// The most recent worker, which an update check compares against.
    pub fn newest(&self) -> Option<&ServiceWorker> {
        self.installing
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.active.as_ref())
    }

    pub fn slot(&self, slot: WorkerSlot) -> Option<&ServiceWorker> {
        match slot {
            WorkerSlot::Installing => self.installing.as_ref(),
            WorkerSlot::Waiting => self.waiting.as_ref(),
            WorkerSlot::Active => self.active.as_ref(),
        }
    }

    /// Start installing a new worker. A previous installing worker is dropped.
    pub fn begin_install(&mut self, mut worker: ServiceWorker) {
        worker.set_state(ServiceWorkerState::Installing);
        if let Some(mut old) = self.installing.replace(worker) {
            old.set_state(ServiceWorkerState::Redundant);
        }
    }

    /// Installing → waiting. A previously waiting worker becomes redundant.
    pub fn install_complete(&mut self) -> Option<ServiceWorkerId> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        let id = worker.id;
        if let Some(mut old) = self.waiting.replace(worker) {
            old.set_state(ServiceWorkerState::Redundant);
        }
        Some(id)
    }

    /// Waiting → active (activating). The old active worker becomes redundant.
    pub fn begin_activation(&mut self) -> Option<ServiceWorkerId> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);
        let id = worker.id;
        if let Some(mut old) = self.active.replace(worker) {
            old.set_state(ServiceWorkerState::Redundant);
        }
        Some(id)
    }

    pub fn finish_activation(&mut self) -> Option<ServiceWorkerId> {
        let worker = self.active.as_mut()?;
        worker.set_state(ServiceWorkerState::Activated);
        Some(worker.id)
    }

    pub fn unregister(&mut self) {
        for mut worker in [
            self.active.take(),
            self.waiting.take(),
            self.installing.take(),
        ]
        .into_iter()
        .flatten()
        {
            worker.set_state(ServiceWorkerState::Redundant);
        }
    }

    pub fn info(&self) -> RegistrationInfo {
        RegistrationInfo {
            scope: self.scope.to_string(),
            script_url: self.script_url.clone(),
            installing: self.installing.as_ref().map(WorkerInfo::from),
            waiting: self.waiting.as_ref().map(WorkerInfo::from),
            active: self.active.as_ref().map(WorkerInfo::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::config::WorkerConfig;
    use crate::testing::{url, FakeNetwork};

    fn worker() -> ServiceWorker {
        let runtime = CacheWorker::new(
            url("https://verso.app/"),
            WorkerConfig::default(),
            Arc::new(FakeNetwork::new()),
            Arc::new(MemoryCacheStore::new()),
        )
        .unwrap();
        ServiceWorker::new(url("https://verso.app/sw.js"), Arc::new(runtime))
    }

    fn registration() -> ServiceWorkerRegistration {
        ServiceWorkerRegistration::new(url("https://verso.app/"), url("https://verso.app/sw.js"))
    }

    #[test]
    fn test_worker_state_transitions() {
        let mut w = worker();
        assert_eq!(w.state, ServiceWorkerState::Parsed);
        w.set_state(ServiceWorkerState::Activated);
        assert_eq!(w.state, ServiceWorkerState::Activated);
        w.set_state(ServiceWorkerState::Redundant);
        assert!(w.runtime().is_err());
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut reg = registration();
        reg.begin_install(worker());
        assert_eq!(reg.installing.as_ref().unwrap().state, ServiceWorkerState::Installing);

        let id = reg.install_complete().unwrap();
        assert!(reg.installing.is_none());
        assert_eq!(reg.waiting.as_ref().unwrap().id, id);
        assert_eq!(reg.waiting.as_ref().unwrap().state, ServiceWorkerState::Installed);

        assert_eq!(reg.begin_activation(), Some(id));
        assert_eq!(reg.finish_activation(), Some(id));
        assert_eq!(reg.active.as_ref().unwrap().state, ServiceWorkerState::Activated);
        assert!(reg.waiting.is_none());
    }

    #[test]
    fn test_only_one_active_worker() {
        let mut reg = registration();
        reg.begin_install(worker());
        reg.install_complete();
        reg.begin_activation();
        reg.finish_activation();
        let first = reg.active.as_ref().unwrap().id;

        reg.begin_install(worker());
        let second = reg.install_complete().unwrap();
        // New worker waits; the old one keeps control.
        assert_eq!(reg.active.as_ref().unwrap().id, first);
        assert_eq!(reg.newest().unwrap().id, second);

        reg.begin_activation();
        reg.finish_activation();
        assert_eq!(reg.active.as_ref().unwrap().id, second);
    }

    #[test]
    fn test_unregister_clears_slots() {
        let mut reg = registration();
        reg.begin_install(worker());
        reg.install_complete();
        reg.unregister();
        assert!(reg.newest().is_none());
        assert_eq!(reg.info().waiting, None);
    }
}
