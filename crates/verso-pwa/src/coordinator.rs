//! Worker registration, update polling and the "update available" signal.
//!
//! ```text
//! start() ──register──▶ ServiceWorkerContainer ──events──▶ listener task
//!    │                          ▲                              │
//!    └── poll task ──update()───┘                 state / update_available (watch)
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;
use verso_common::{Result, VersoError};
use verso_sw::{
    NotificationSink, RegistrationOptions, ServiceWorkerContainer, ServiceWorkerEvent,
    ServiceWorkerId, ServiceWorkerState, WorkerMessage, WorkerSlot,
};

use crate::config::PwaConfig;

/// The page's window, as far as the worker lifecycle needs it.
#[async_trait]
pub trait PageHost: Send + Sync {
    async fn reload(&self);
    async fn open_window(&self, url: &Url);
}

/// Registration state as seen by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    #[default]
    Unregistered,
    Installing,
    InstalledWaiting,
    Active,
    UpdateAvailable,
}

struct Shared {
    container: Arc<ServiceWorkerContainer>,
    host: Arc<dyn PageHost>,
    sink: Arc<dyn NotificationSink>,
    script_url: Url,
    scope_url: Url,
    scope: RwLock<Option<String>>,
    state: watch::Sender<RegistrationState>,
    update_available: watch::Sender<bool>,
    /// Workers already announced as updates.
    announced: Mutex<HashSet<ServiceWorkerId>>,
}

impl Shared {
    async fn handle_event(&self, event: ServiceWorkerEvent) {
        match event {
            ServiceWorkerEvent::UpdateFound { scope } => debug!(scope = %scope, "Update found"),
            ServiceWorkerEvent::StateChange {
                worker_id,
                new_state,
                controller,
                ..
            } => self.on_state_change(worker_id, new_state, controller),
            ServiceWorkerEvent::ControllerChange { worker_id } => {
                debug!(worker = worker_id.raw(), "Controller changed");
            }
            ServiceWorkerEvent::Message {
                message: WorkerMessage::UpdateAvailable,
                ..
            } => self.announce_update(),
            ServiceWorkerEvent::Message { message, .. } => {
                debug!(?message, "Ignoring worker message");
            }
            ServiceWorkerEvent::ShowNotification(notification) => {
                if let Err(e) = self.sink.show(notification).await {
                    warn!(error = %e, "Notification could not be shown");
                }
            }
            ServiceWorkerEvent::OpenWindow(url) => self.host.open_window(&url).await,
        }
    }

    fn on_state_change(
        &self,
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
        controller: Option<ServiceWorkerId>,
    ) {
        match new_state {
            ServiceWorkerState::Installing => self.set_state(RegistrationState::Installing),
            ServiceWorkerState::Installed if controller.is_some() => {
                let first = self
                    .announced
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(worker_id);
                if first {
                    self.announce_update();
                }
            }
            ServiceWorkerState::Installed => self.set_state(RegistrationState::InstalledWaiting),
            ServiceWorkerState::Activated => self.set_state(RegistrationState::Active),
            _ => {}
        }
    }

    /// Update state; an announced update stays visible until accepted.
    fn set_state(&self, state: RegistrationState) {
        self.state.send_if_modified(|current| {
            if *current == RegistrationState::UpdateAvailable || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn announce_update(&self) {
        let fresh = self.update_available.send_if_modified(|available| {
            let fresh = !*available;
            *available = true;
            fresh
        });
        self.state.send_replace(RegistrationState::UpdateAvailable);
        if fresh {
            info!("New version available");
        }
    }

    async fn check_for_updates(&self) -> bool {
        let Some(scope) = self.container.get_registration(self.scope_url.as_str()).await else {
            debug!("No registration to update");
            return false;
        };
        match self.container.update(&scope).await {
            Ok(result) => {
                debug!(?result, "Update check finished");
                true
            }
            Err(e) => {
                warn!(error = %e, "Error checking for updates");
                false
            }
        }
    }
}

/// Registers the worker and keeps the page informed about new versions.
pub struct RegistrationCoordinator {
    shared: Arc<Shared>,
    poll: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl RegistrationCoordinator {
    pub fn new(
        container: Arc<ServiceWorkerContainer>,
        host: Arc<dyn PageHost>,
        sink: Arc<dyn NotificationSink>,
        origin: &Url,
        config: &PwaConfig,
    ) -> Result<Self> {
        let script_url = origin
            .join(&config.worker_path)
            .map_err(|e| VersoError::config(format!("worker path {}: {e}", config.worker_path)))?;
        let scope_url = origin
            .join(&config.scope)
            .map_err(|e| VersoError::config(format!("scope {}: {e}", config.scope)))?;

        let (state, _) = watch::channel(RegistrationState::default());
        let (update_available, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                container,
                host,
                sink,
                script_url,
                scope_url,
                scope: RwLock::new(None),
                state,
                update_available,
                announced: Mutex::new(HashSet::new()),
            }),
            poll: config.update_poll(),
            tasks: Vec::new(),
        })
    }

    /// Listen to container events, register the worker and start polling.
    /// Registration failure is logged; the page keeps working uncontrolled.
    pub async fn start(&mut self, mut events: mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> bool {
        let shared = Arc::clone(&self.shared);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                shared.handle_event(event).await;
            }
            debug!("Container event stream closed");
        }));

        let options = RegistrationOptions {
            scope: Some(self.shared.scope_url.to_string()),
        };
        match self
            .shared
            .container
            .register(self.shared.script_url.as_str(), options)
            .await
        {
            Ok(scope) => {
                info!(scope = %scope, "SW registered");
                *self.shared.scope.write().await = Some(scope);
            }
            Err(e) => {
                warn!(error = %e, "SW registration failed");
                return false;
            }
        }

        let shared = Arc::clone(&self.shared);
        let every = self.poll;
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // consume the immediate first tick
            loop {
                ticker.tick().await;
                shared.check_for_updates().await;
            }
        }));
        true
    }

    /// Manual update check. Returns whether a registration was found and checked.
    pub async fn check_for_updates(&self) -> bool {
        self.shared.check_for_updates().await
    }

    /// Ask the waiting worker to take over, then reload the page.
    pub async fn accept_update(&self) {
        let scope = self.shared.scope.read().await.clone();
        if let Some(scope) = scope {
            let waiting = self
                .shared
                .container
                .registration_info(&scope)
                .await
                .and_then(|info| info.waiting);
            if waiting.is_some() {
                if let Err(e) = self
                    .shared
                    .container
                    .post_message(&scope, WorkerSlot::Waiting, &WorkerMessage::SkipWaiting.to_json())
                    .await
                {
                    warn!(error = %e, "Take-over message failed");
                }
            }
        }

        self.shared.update_available.send_replace(false);
        if self.shared.container.controller().await.is_some() {
            self.shared.state.send_replace(RegistrationState::Active);
        }
        info!("Reloading page for update");
        self.shared.host.reload().await;
    }

    pub fn state(&self) -> RegistrationState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RegistrationState> {
        self.shared.state.subscribe()
    }

    pub fn update_available(&self) -> bool {
        *self.shared.update_available.borrow()
    }

    pub fn subscribe_updates(&self) -> watch::Receiver<bool> {
        self.shared.update_available.subscribe()
    }

    /// Registration scope, once registered.
    pub async fn scope(&self) -> Option<String> {
        self.shared.scope.read().await.clone()
    }

    /// Stop the listener and poll tasks.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for RegistrationCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RegistrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationCoordinator")
            .field("script_url", &self.shared.script_url.as_str())
            .field("state", &self.state())
            .field("update_available", &self.update_available())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use verso_sw::testing::{url, FakeNetwork, RecordingSink};
    use verso_sw::{MemoryCacheStore, StaticScript, WorkerConfig};

    #[derive(Default)]
    pub(crate) struct FakeHost {
        pub reloads: AtomicUsize,
        pub opened: Mutex<Vec<Url>>,
    }

    #[async_trait]
    impl PageHost for FakeHost {
        async fn reload(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }

        async fn open_window(&self, url: &Url) {
            self.opened.lock().unwrap().push(url.clone());
        }
    }

    pub(crate) fn worker_config(name: &str) -> WorkerConfig {
        WorkerConfig::default()
            .with_cache_name(name)
            .with_shell(["/", "/static/js/bundle.js"])
    }

    pub(crate) fn page_network() -> Arc<FakeNetwork> {
        Arc::new(
            FakeNetwork::new()
                .route("https://verso.app/", 200, "<html>")
                .route("https://verso.app/static/js/bundle.js", 200, "js"),
        )
    }

    struct Harness {
        coordinator: RegistrationCoordinator,
        container: Arc<ServiceWorkerContainer>,
        script: Arc<StaticScript>,
        host: Arc<FakeHost>,
        events: Option<mpsc::UnboundedReceiver<ServiceWorkerEvent>>,
    }

    fn harness(worker: WorkerConfig, config: PwaConfig) -> Harness {
        let script = Arc::new(StaticScript::new(worker));
        let (container, events) = ServiceWorkerContainer::new(
            page_network(),
            Arc::new(MemoryCacheStore::new()),
            script.clone(),
        );
        let container = Arc::new(container);
        let host = Arc::new(FakeHost::default());
        let coordinator = RegistrationCoordinator::new(
            container.clone(),
            host.clone(),
            Arc::new(RecordingSink::new()),
            &url("https://verso.app/"),
            &config,
        )
        .unwrap();
        Harness {
            coordinator,
            container,
            script,
            host,
            events: Some(events),
        }
    }

    impl Harness {
        async fn start(&mut self) -> bool {
            let events = self.events.take().unwrap();
            self.coordinator.start(events).await
        }

        async fn wait_state(&self, want: RegistrationState) {
            let mut rx = self.coordinator.subscribe_state();
            rx.wait_for(|s| *s == want).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_first_visit_activates_without_update() {
        let mut h = harness(worker_config("v1"), PwaConfig::default());
        assert!(h.start().await);

        h.wait_state(RegistrationState::Active).await;
        assert!(!h.coordinator.update_available());
        assert!(h.container.controller().await.is_some());
        assert_eq!(h.coordinator.scope().await.as_deref(), Some("https://verso.app/"));
    }

    #[tokio::test]
    async fn test_new_version_announced_once() {
        let mut h = harness(worker_config("v1"), PwaConfig::default());
        h.start().await;
        h.wait_state(RegistrationState::Active).await;

        let mut updates = h.coordinator.subscribe_updates();
        h.script.publish(worker_config("v2")).await;
        assert!(h.coordinator.check_for_updates().await);

        updates.wait_for(|available| *available).await.unwrap();
        assert_eq!(h.coordinator.state(), RegistrationState::UpdateAvailable);

        // Same script again: no new transition.
        assert!(h.coordinator.check_for_updates().await);
        tokio::task::yield_now().await;
        assert!(!updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_accept_update_takes_over_and_reloads() {
        let mut h = harness(
            worker_config("v1").with_skip_waiting(false),
            PwaConfig::default(),
        );
        h.start().await;
        h.wait_state(RegistrationState::Active).await;
        let first = h.container.controller().await;

        h.script
            .publish(worker_config("v2").with_skip_waiting(false))
            .await;
        h.coordinator.check_for_updates().await;
        h.wait_state(RegistrationState::UpdateAvailable).await;

        h.coordinator.accept_update().await;

        assert_ne!(h.container.controller().await, first);
        assert_eq!(h.host.reloads.load(Ordering::SeqCst), 1);
        assert!(!h.coordinator.update_available());
        assert_eq!(h.coordinator.state(), RegistrationState::Active);
    }

    #[tokio::test]
    async fn test_accept_without_waiting_worker_still_reloads() {
        let mut h = harness(worker_config("v1"), PwaConfig::default());
        h.start().await;
        h.coordinator.accept_update().await;
        assert_eq!(h.host.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_detects_deploy() {
        let mut h = harness(worker_config("v1"), PwaConfig::default());
        h.start().await;
        h.wait_state(RegistrationState::Active).await;

        h.script.publish(worker_config("v2")).await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        h.wait_state(RegistrationState::UpdateAvailable).await;
        assert!(h.coordinator.update_available());
    }

    #[tokio::test]
    async fn test_registration_failure_is_not_fatal() {
        let config = PwaConfig {
            scope: "https://elsewhere.example/".into(),
            ..PwaConfig::default()
        };
        let mut h = harness(worker_config("v1"), config);

        assert!(!h.start().await);
        assert_eq!(h.coordinator.state(), RegistrationState::Unregistered);
        assert!(!h.coordinator.check_for_updates().await);
    }

    #[tokio::test]
    async fn test_worker_broadcast_and_click() {
        let mut h = harness(worker_config("v1"), PwaConfig::default());
        h.start().await;
        h.wait_state(RegistrationState::Active).await;
        let scope = h.coordinator.scope().await.unwrap();

        h.container
            .post_message(&scope, WorkerSlot::Active, &WorkerMessage::UpdateAvailable.to_json())
            .await
            .unwrap();
        h.wait_state(RegistrationState::UpdateAvailable).await;

        let reminder = verso_sw::Notification::push(None);
        h.container.notification_click(&scope, &reminder).await.unwrap();
        for _ in 0..10 {
            if !h.host.opened.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.host.opened.lock().unwrap()[0].as_str(), "https://verso.app/");
    }
}
