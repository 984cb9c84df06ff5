//! Install prompt gate and install flow.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::PwaConfig;
use crate::prefs::{Settings, INSTALLED, INSTALL_DISMISSED_AT};
use crate::status::{InstallChoice, InstallIntent, PlatformSignals, PwaStatus};

/// Owns [`PwaStatus`] and the deferred install intent.
pub struct InstallPrompt {
    status: watch::Sender<PwaStatus>,
    intent: Mutex<Option<Arc<dyn InstallIntent>>>,
    settings: Settings,
    clock: Arc<dyn Clock>,
    config: PwaConfig,
}

impl InstallPrompt {
    pub fn new(
        signals: &PlatformSignals,
        settings: Settings,
        clock: Arc<dyn Clock>,
        config: PwaConfig,
    ) -> Self {
        let status = PwaStatus::detect(signals, settings.get(&INSTALLED));
        debug!(?status, "PWA status detected");
        let (status, _) = watch::channel(status);
        Self {
            status,
            intent: Mutex::new(None),
            settings,
            clock,
            config,
        }
    }

    pub fn status(&self) -> PwaStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PwaStatus> {
        self.status.subscribe()
    }

    /// The platform offered a deferred install prompt.
    pub fn capture_intent(&self, intent: Arc<dyn InstallIntent>) {
        *self.intent.lock().unwrap_or_else(|e| e.into_inner()) = Some(intent);
        self.status.send_modify(|s| s.is_installable = true);
        debug!("Install intent captured");
    }

    /// Run the install dialog. Returns whether the user accepted.
    /// The intent is consumed either way.
    pub async fn install(&self) -> bool {
        let intent = self.intent.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(intent) = intent else {
            debug!("Install requested without a captured intent");
            return false;
        };
        self.status.send_if_modified(|s| std::mem::replace(&mut s.is_installable, false));

        match intent.prompt().await {
            Ok(InstallChoice::Accepted) => {
                self.mark_installed();
                true
            }
            Ok(InstallChoice::Dismissed) => {
                info!("Install dialog dismissed");
                false
            }
            Err(e) => {
                error!(error = %e, category = e.category(), "Error during PWA installation");
                false
            }
        }
    }

    /// The platform reports the app was installed.
    pub fn app_installed(&self) {
        self.intent.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.mark_installed();
    }

    pub fn set_online(&self, online: bool) {
        self.status.send_if_modified(|s| {
            let changed = s.is_offline == online;
            s.is_offline = !online;
            changed
        });
    }

    /// Whether the install banner may be shown right now.
    pub fn should_show(&self) -> bool {
        let status = self.status();
        if !status.is_installable || status.is_installed || status.is_standalone || !status.supports_pwa {
            return false;
        }

        let dismissed_at = self.settings.get(&INSTALL_DISMISSED_AT);
        let elapsed = self.clock.now_millis() - dismissed_at;
        elapsed > self.config.install_dismiss_window().num_milliseconds()
    }

    /// Wait out the prompt delay, then evaluate the gate.
    pub async fn wait_for_prompt(&self) -> bool {
        tokio::time::sleep(self.config.install_prompt_delay()).await;
        self.should_show()
    }

    /// Hide the banner for the dismissal window.
    pub fn dismiss(&self) {
        if let Err(e) = self.settings.set(&INSTALL_DISMISSED_AT, &self.clock.now_millis()) {
            warn!(error = %e, category = e.category(), "Could not persist install prompt dismissal");
        }
    }

    fn mark_installed(&self) {
        self.status.send_modify(|s| {
            s.is_installed = true;
            s.is_installable = false;
        });
        if let Err(e) = self.settings.set(&INSTALLED, &true) {
            warn!(error = %e, category = e.category(), "Could not persist installed flag");
        }
        info!("App installed");
    }
}

impl std::fmt::Debug for InstallPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallPrompt")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
