//! Host side of the worker lifecycle (`navigator.serviceWorker` plus the
//! browser's own bookkeeping).
//!
//! The container runs install and activate to completion one job at a time,
//! routes page fetches to the active worker, and reports everything the page
//! may care about on an event channel.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::config::WorkerConfig;
use crate::error::ServiceWorkerError;
use crate::lifecycle::{ActivateReport, InstallReport};
use crate::message::WorkerMessage;
use crate::notification::Notification;
use crate::registration::{
    RegistrationInfo, ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration,
    ServiceWorkerState, WorkerSlot,
};
use crate::request::{FetchRequest, Network};
use crate::worker::{CacheWorker, ClickOutcome, FetchOutcome, MessageOutcome};

/// Loads the worker script behind a URL. Equal configs mean an unchanged script.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn load(&self, script_url: &Url) -> Result<WorkerConfig, ServiceWorkerError>;
}

/// A script source serving one config, replaceable to simulate a deploy.
#[derive(Debug)]
pub struct StaticScript {
    config: RwLock<WorkerConfig>,
}

impl StaticScript {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Serve a new script version from now on.
    pub async fn publish(&self, config: WorkerConfig) {
        *self.config.write().await = config;
    }
}

#[async_trait]
impl ScriptSource for StaticScript {
    async fn load(&self, _script_url: &Url) -> Result<WorkerConfig, ServiceWorkerError> {
        Ok(self.config.read().await.clone())
    }
}

/// Options for [`ServiceWorkerContainer::register`].
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// Scope URL; defaults to the script's directory.
    pub scope: Option<String>,
}

/// Container events.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// A new worker started installing.
    UpdateFound { scope: String },
    StateChange {
        scope: String,
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
        /// Worker controlling the page when the change happened.
        controller: Option<ServiceWorkerId>,
    },
    ControllerChange { worker_id: ServiceWorkerId },
    /// Message posted by a worker to its clients.
    Message {
        from: ServiceWorkerId,
        message: WorkerMessage,
    },
    ShowNotification(Notification),
    OpenWindow(Url),
}

/// Result of an update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    /// Script unchanged; nothing installed.
    Unchanged,
    Installed {
        worker_id: ServiceWorkerId,
        report: InstallReport,
        /// Set when the new worker also took over.
        activated: Option<ActivateReport>,
    },
}

/// Service worker container.
pub struct ServiceWorkerContainer {
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,
    controller: Arc<RwLock<Option<ServiceWorkerId>>>,
    network: Arc<dyn Network>,
    caches: Arc<dyn CacheStore>,
    scripts: Arc<dyn ScriptSource>,
    /// Serialises install / activate jobs.
    jobs: Mutex<()>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    pub fn new(
        network: Arc<dyn Network>,
        caches: Arc<dyn CacheStore>,
        scripts: Arc<dyn ScriptSource>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registrations: Arc::new(RwLock::new(HashMap::new())),
                controller: Arc::new(RwLock::new(None)),
                network,
                caches,
                scripts,
                jobs: Mutex::new(()),
                event_tx,
            },
            event_rx,
        )
    }

    /// Register a worker script and run an update check for it.
    /// Returns the registration scope.
    pub async fn register(
        &self,
        script_url: &str,
        options: RegistrationOptions,
    ) -> Result<String, ServiceWorkerError> {
        let script_url = Url::parse(script_url)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

        let scope = match options.scope {
            Some(s) => script_url
                .join(&s)
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
            None => script_url
                .join("./")
                .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
        };

        if scope.origin() != script_url.origin() {
            return Err(ServiceWorkerError::SecurityError(format!(
                "scope {scope} is not same-origin with {script_url}"
            )));
        }

        let scope_str = scope.to_string();
        {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(scope_str.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(scope, script_url.clone()));
            registration.script_url = script_url;
        }

        self.update(&scope_str).await?;
        Ok(scope_str)
    }

    /// Check the script for changes; install (and maybe activate) a new worker.
    pub async fn update(&self, scope: &str) -> Result<UpdateResult, ServiceWorkerError> {
        let _job = self.jobs.lock().await;

        let (scope_url, script_url, newest) = {
            let registrations = self.registrations.read().await;
            let registration = registrations
                .get(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let newest = registration
                .newest()
                .and_then(|w| w.runtime().ok())
                .map(|rt| rt.config().clone());
            (
                registration.scope.clone(),
                registration.script_url.clone(),
                newest,
            )
        };

        let config = self.scripts.load(&script_url).await?;
        if newest.as_ref() == Some(&config) {
            debug!(scope, "Worker script unchanged");
            return Ok(UpdateResult::Unchanged);
        }

        let runtime = Arc::new(CacheWorker::new(
            scope_url,
            config,
            Arc::clone(&self.network),
            Arc::clone(&self.caches),
        )?);
        let worker = ServiceWorker::new(script_url, Arc::clone(&runtime));
        let worker_id = worker.id;

        self.with_registration(scope, |r| r.begin_install(worker)).await?;
        let _ = self.event_tx.send(ServiceWorkerEvent::UpdateFound {
            scope: scope.to_string(),
        });
        self.emit_state(scope, worker_id, ServiceWorkerState::Installing).await;

        let install = runtime.on_install().await;

        let has_active = self
            .with_registration(scope, |r| {
                r.install_complete();
                r.active.is_some()
            })
            .await?;
        self.emit_state(scope, worker_id, ServiceWorkerState::Installed).await;
        info!(scope, cache = runtime.cache_name(), "SW installed");

        let activated = if install.skip_waiting || !has_active {
            self.activate_waiting(scope).await?
        } else {
            None
        };

        Ok(UpdateResult::Installed {
            worker_id,
            report: install.report,
            activated,
        })
    }

    /// Activate the waiting worker, if any.
    pub async fn activate(&self, scope: &str) -> Result<Option<ActivateReport>, ServiceWorkerError> {
        let _job = self.jobs.lock().await;
        self.activate_waiting(scope).await
    }

    async fn activate_waiting(&self, scope: &str) -> Result<Option<ActivateReport>, ServiceWorkerError> {
        let (worker_id, runtime) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let Some(worker_id) = registration.begin_activation() else {
                return Ok(None);
            };
            let runtime = registration
                .active
                .as_ref()
                .ok_or_else(|| ServiceWorkerError::StateError("no active worker".into()))?
                .runtime()?;
            (worker_id, runtime)
        };
        self.emit_state(scope, worker_id, ServiceWorkerState::Activating).await;

        let outcome = runtime.on_activate().await;

        self.with_registration(scope, |r| r.finish_activation()).await?;
        self.emit_state(scope, worker_id, ServiceWorkerState::Activated).await;

        if outcome.claim_clients {
            *self.controller.write().await = Some(worker_id);
            let _ = self
                .event_tx
                .send(ServiceWorkerEvent::ControllerChange { worker_id });
        }

        Ok(Some(outcome.report))
    }

    /// Route a page fetch through the active worker of the matching scope.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let runtime = {
            let registrations = self.registrations.read().await;
            registrations
                .iter()
                .filter(|(scope, _)| request.url.as_str().starts_with(scope.as_str()))
                .max_by_key(|(scope, _)| scope.len())
                .and_then(|(_, r)| r.active.as_ref())
                .and_then(|w| w.runtime().ok())
        };

        match runtime {
            Some(runtime) => runtime.on_fetch(request).await,
            None => FetchOutcome::Passthrough,
        }
    }

    /// Post a JSON message to one worker of a registration.
    pub async fn post_message(
        &self,
        scope: &str,
        slot: WorkerSlot,
        data: &str,
    ) -> Result<(), ServiceWorkerError> {
        let (worker_id, runtime) = {
            let registrations = self.registrations.read().await;
            let worker = registrations
                .get(scope)
                .and_then(|r| r.slot(slot))
                .ok_or_else(|| ServiceWorkerError::NotFound(format!("{slot:?} worker in {scope}")))?;
            (worker.id, worker.runtime()?)
        };

        match runtime.on_message(data) {
            MessageOutcome::SkipWaiting => {
                if slot == WorkerSlot::Waiting {
                    self.activate(scope).await?;
                }
            }
            MessageOutcome::Broadcast(message) => {
                let _ = self.event_tx.send(ServiceWorkerEvent::Message {
                    from: worker_id,
                    message,
                });
            }
            MessageOutcome::Ignored => {}
        }
        Ok(())
    }

    /// Deliver a push to the active worker.
    pub async fn push(&self, scope: &str, payload: Option<&str>) -> Result<(), ServiceWorkerError> {
        let notification = self.active_runtime(scope).await?.on_push(payload);
        let _ = self
            .event_tx
            .send(ServiceWorkerEvent::ShowNotification(notification));
        Ok(())
    }

    pub async fn notification_click(
        &self,
        scope: &str,
        notification: &Notification,
    ) -> Result<(), ServiceWorkerError> {
        let ClickOutcome::OpenWindow(url) =
            self.active_runtime(scope).await?.on_notification_click(notification);
        let _ = self.event_tx.send(ServiceWorkerEvent::OpenWindow(url));
        Ok(())
    }

    pub async fn sync(&self, scope: &str, tag: &str) -> Result<bool, ServiceWorkerError> {
        Ok(self.active_runtime(scope).await?.on_sync(tag))
    }

    /// Wait for the detached cache writes of every active worker.
    pub async fn settle(&self) {
        let runtimes: Vec<Arc<CacheWorker>> = {
            let registrations = self.registrations.read().await;
            registrations
                .values()
                .filter_map(|r| r.active.as_ref())
                .filter_map(|w| w.runtime().ok())
                .collect()
        };
        for runtime in runtimes {
            runtime.settle().await;
        }
    }

    /// Worker controlling the page.
    pub async fn controller(&self) -> Option<ServiceWorkerId> {
        *self.controller.read().await
    }

    /// Scope of the registration matching a URL.
    pub async fn get_registration(&self, url: &str) -> Option<String> {
        let registrations = self.registrations.read().await;
        registrations
            .keys()
            .filter(|scope| url.starts_with(scope.as_str()))
            .max_by_key(|scope| scope.len())
            .cloned()
    }

    pub async fn get_registrations(&self) -> Vec<String> {
        self.registrations.read().await.keys().cloned().collect()
    }

    pub async fn registration_info(&self, scope: &str) -> Option<RegistrationInfo> {
        self.registrations
            .read()
            .await
            .get(scope)
            .map(ServiceWorkerRegistration::info)
    }

    pub async fn unregister(&self, scope: &str) -> Result<bool, ServiceWorkerError> {
        let _job = self.jobs.lock().await;
        let removed = self.registrations.write().await.remove(scope);
        match removed {
            Some(mut registration) => {
                let active = registration.active.as_ref().map(|w| w.id);
                registration.unregister();
                let mut controller = self.controller.write().await;
                if active.is_some() && *controller == active {
                    *controller = None;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn active_runtime(&self, scope: &str) -> Result<Arc<CacheWorker>, ServiceWorkerError> {
        let registrations = self.registrations.read().await;
        registrations
            .get(scope)
            .and_then(|r| r.active.as_ref())
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("active worker in {scope}")))?
            .runtime()
    }

    async fn with_registration<T>(
        &self,
        scope: &str,
        f: impl FnOnce(&mut ServiceWorkerRegistration) -> T,
    ) -> Result<T, ServiceWorkerError> {
        let mut registrations = self.registrations.write().await;
        match registrations.get_mut(scope) {
            Some(registration) => Ok(f(registration)),
            None => {
                warn!(scope, "Registration vanished during lifecycle job");
                Err(ServiceWorkerError::NotFound(scope.to_string()))
            }
        }
    }

    async fn emit_state(&self, scope: &str, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        let controller = *self.controller.read().await;
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            scope: scope.to_string(),
            worker_id,
            new_state,
            controller,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::request::ResponseSource;
    use crate::testing::{url, FakeNetwork};

    const SW: &str = "https://verso.app/sw.js";
    const ROOT: &str = "https://verso.app/";

    struct Harness {
        container: ServiceWorkerContainer,
        events: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
        network: Arc<FakeNetwork>,
        store: Arc<MemoryCacheStore>,
        script: Arc<StaticScript>,
    }

    fn harness(config: WorkerConfig) -> Harness {
        let network = Arc::new(
            FakeNetwork::new()
                .route(ROOT, 200, "<html>")
                .route("https://verso.app/static/js/bundle.js", 200, "js"),
        );
        let store = Arc::new(MemoryCacheStore::new());
        let script = Arc::new(StaticScript::new(config));
        let (container, events) =
            ServiceWorkerContainer::new(network.clone(), store.clone(), script.clone());
        Harness {
            container,
            events,
            network,
            store,
            script,
        }
    }

    fn shell_config(name: &str) -> WorkerConfig {
        WorkerConfig::default()
            .with_cache_name(name)
            .with_shell(["/", "/static/js/bundle.js"])
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_register_installs_and_claims() {
        let mut h = harness(shell_config("v1"));
        let scope = h.container.register(SW, RegistrationOptions::default()).await.unwrap();
        assert_eq!(scope, ROOT);

        let info = h.container.registration_info(&scope).await.unwrap();
        let active = info.active.unwrap();
        assert_eq!(active.state, ServiceWorkerState::Activated);
        assert_eq!(h.container.controller().await, Some(active.id));
        assert_eq!(h.store.keys("v1").await.unwrap().len(), 2);

        let events = drain(&mut h.events);
        assert!(matches!(events[0], ServiceWorkerEvent::UpdateFound { .. }));
        assert!(events
            .iter()
            .any(|e| matches!(e, ServiceWorkerEvent::ControllerChange { .. })));
    }

    #[tokio::test]
    async fn test_first_install_reports_no_controller() {
        let mut h = harness(shell_config("v1"));
        h.container.register(SW, RegistrationOptions::default()).await.unwrap();

        let installed = drain(&mut h.events).into_iter().find_map(|e| match e {
            ServiceWorkerEvent::StateChange {
                new_state: ServiceWorkerState::Installed,
                controller,
                ..
            } => Some(controller),
            _ => None,
        });
        assert_eq!(installed, Some(None));
    }

    #[tokio::test]
    async fn test_cross_origin_scope_rejected() {
        let h = harness(shell_config("v1"));
        let options = RegistrationOptions {
            scope: Some("https://evil.example/".into()),
        };
        assert!(matches!(
            h.container.register(SW, options).await,
            Err(ServiceWorkerError::SecurityError(_))
        ));
    }

    #[tokio::test]
    async fn test_unchanged_script_is_noop() {
        let h = harness(shell_config("v1"));
        let scope = h.container.register(SW, RegistrationOptions::default()).await.unwrap();
        let calls = h.network.calls();

        assert_eq!(h.container.update(&scope).await.unwrap(), UpdateResult::Unchanged);
        assert_eq!(h.network.calls(), calls);
    }

    #[tokio::test]
    async fn test_new_version_replaces_old_generation() {
        let h = harness(shell_config("v1"));
        let scope = h.container.register(SW, RegistrationOptions::default()).await.unwrap();

        h.script.publish(shell_config("v2")).await;
        let result = h.container.update(&scope).await.unwrap();

        match result {
            UpdateResult::Installed { activated: Some(report), .. } => {
                assert_eq!(report.deleted, vec!["v1"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.store.names().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_waiting_worker_takes_over_on_message() {
        let mut h = harness(shell_config("v1").with_skip_waiting(false));
        let scope = h.container.register(SW, RegistrationOptions::default()).await.unwrap();
        let first = h.container.controller().await.unwrap();

        h.script
            .publish(shell_config("v2").with_skip_waiting(false))
            .await;
        h.container.update(&scope).await.unwrap();
        drain(&mut h.events);

        let info = h.container.registration_info(&scope).await.unwrap();
        let waiting = info.waiting.unwrap();
        assert_eq!(waiting.state, ServiceWorkerState::Installed);
        assert_eq!(h.container.controller().await, Some(first));

        h.container
            .post_message(&scope, WorkerSlot::Waiting, &WorkerMessage::SkipWaiting.to_json())
            .await
            .unwrap();

        assert_eq!(h.container.controller().await, Some(waiting.id));
        assert_eq!(h.store.names().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_unknown_message_is_ignored() {
        let mut h = harness(shell_config("v1"));
        let scope = h.container.register(SW, RegistrationOptions::default()).await.unwrap();
        drain(&mut h.events);

        h.container
            .post_message(&scope, WorkerSlot::Active, r#"{"type":"CLAIM"}"#)
            .await
            .unwrap();
        h.container
            .post_message(&scope, WorkerSlot::Active, "not json")
            .await
            .unwrap();
        assert!(drain(&mut h.events).is_empty());

        h.container
            .post_message(&scope, WorkerSlot::Active, r#"{"type":"UPDATE_AVAILABLE"}"#)
            .await
            .unwrap();
        assert!(matches!(
            drain(&mut h.events).pop(),
            Some(ServiceWorkerEvent::Message {
                message: WorkerMessage::UpdateAvailable,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_fetch_routed_to_active_worker() {
        let h = harness(shell_config("v1"));
        let probe = FetchRequest::get(url("https://verso.app/static/js/bundle.js"));
        assert!(matches!(h.container.handle_fetch(&probe).await, FetchOutcome::Passthrough));

        h.container.register(SW, RegistrationOptions::default()).await.unwrap();
        let calls = h.network.calls();
        let served = h.container.handle_fetch(&probe).await;
        assert_eq!(served.source(), Some(ResponseSource::Cache));
        assert_eq!(h.network.calls(), calls);
    }

    #[tokio::test]
    async fn test_settle_waits_for_runtime_writes() {
        let h = harness(shell_config("v1"));
        h.container.register(SW, RegistrationOptions::default()).await.unwrap();
        h.network
            .set_route("https://verso.app/api/versiculo-do-dia", 200, r#"{"v":1}"#);

        let api = FetchRequest::get(url("https://verso.app/api/versiculo-do-dia"));
        let served = h.container.handle_fetch(&api).await;
        assert_eq!(served.source(), Some(ResponseSource::Network));

        h.container.settle().await;
        assert_eq!(h.store.keys("v1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_push_and_click_events() {
        let mut h = harness(shell_config("v1"));
        let scope = h.container.register(SW, RegistrationOptions::default()).await.unwrap();
        drain(&mut h.events);

        h.container.push(&scope, None).await.unwrap();
        let notification = match drain(&mut h.events).pop() {
            Some(ServiceWorkerEvent::ShowNotification(n)) => n,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(notification.title, "Verso Diário");

        h.container.notification_click(&scope, &notification).await.unwrap();
        assert!(matches!(
            drain(&mut h.events).pop(),
            Some(ServiceWorkerEvent::OpenWindow(u)) if u.as_str() == ROOT
        ));
    }

    #[tokio::test]
    async fn test_unregister() {
        let h = harness(shell_config("v1"));
        let scope = h.container.register(SW, RegistrationOptions::default()).await.unwrap();

        assert!(h.container.unregister(&scope).await.unwrap());
        assert!(h.container.get_registrations().await.is_empty());
        assert_eq!(h.container.controller().await, None);
        assert!(!h.container.unregister(&scope).await.unwrap());
    }
}
