//! The page controller: everything the page runs at startup, in one place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use url::Url;
use verso_common::Result;
use verso_sw::{NotificationSink, ServiceWorkerContainer, ServiceWorkerEvent};

use crate::clock::Clock;
use crate::config::PwaConfig;
use crate::coordinator::{PageHost, RegistrationCoordinator, RegistrationState};
use crate::install::InstallPrompt;
use crate::notify::{NotificationScheduler, Permission, PermissionPrompter};
use crate::prefs::{KeyValueStore, Settings};
use crate::status::{PlatformSignals, PwaStatus};

/// Collaborators the page controller is built from.
pub struct PwaParts {
    pub origin: Url,
    pub config: PwaConfig,
    pub signals: PlatformSignals,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub container: Arc<ServiceWorkerContainer>,
    pub events: mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    pub host: Arc<dyn PageHost>,
    pub sink: Arc<dyn NotificationSink>,
    pub prompter: Arc<dyn PermissionPrompter>,
}

/// Point-in-time view for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PwaSnapshot {
    pub status: PwaStatus,
    pub registration: RegistrationState,
    pub update_available: bool,
    pub notification_permission: Permission,
    pub next_reminder: Option<DateTime<Utc>>,
}

pub struct PwaController {
    coordinator: RegistrationCoordinator,
    install: InstallPrompt,
    notifications: NotificationScheduler,
    events: Option<mpsc::UnboundedReceiver<ServiceWorkerEvent>>,
}

impl PwaController {
    pub fn new(parts: PwaParts) -> Result<Self> {
        let settings = Settings::new(parts.store);
        let coordinator = RegistrationCoordinator::new(
            parts.container,
            parts.host,
            Arc::clone(&parts.sink),
            &parts.origin,
            &parts.config,
        )?;
        let install = InstallPrompt::new(
            &parts.signals,
            settings.clone(),
            Arc::clone(&parts.clock),
            parts.config.clone(),
        );
        let notifications = NotificationScheduler::new(
            settings,
            parts.clock,
            parts.prompter,
            parts.sink,
            parts.config,
        );

        Ok(Self {
            coordinator,
            install,
            notifications,
            events: Some(parts.events),
        })
    }

    /// Register the worker and restore the reminder schedule.
    /// Returns whether the worker was registered.
    pub async fn start(&mut self) -> bool {
        let registered = match self.events.take() {
            Some(events) => self.coordinator.start(events).await,
            None => self.coordinator.scope().await.is_some(),
        };
        let next = self.notifications.resume().await;
        info!(registered, next_reminder = ?next, "Page controller started");
        registered
    }

    pub fn coordinator(&self) -> &RegistrationCoordinator {
        &self.coordinator
    }

    pub fn install(&self) -> &InstallPrompt {
        &self.install
    }

    pub fn notifications(&self) -> &NotificationScheduler {
        &self.notifications
    }

    pub fn snapshot(&self) -> PwaSnapshot {
        PwaSnapshot {
            status: self.install.status(),
            registration: self.coordinator.state(),
            update_available: self.coordinator.update_available(),
            notification_permission: self.notifications.permission(),
            next_reminder: self.notifications.next_fire(),
        }
    }

    pub fn shutdown(&mut self) {
        self.coordinator.shutdown();
        self.notifications.cancel();
    }
}

impl std::fmt::Debug for PwaController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PwaController")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}
