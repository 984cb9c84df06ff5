//! Installability and connectivity as the page sees them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use verso_common::Result;

/// What the page can observe about its platform at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSignals {
    pub service_worker: bool,
    pub push_manager: bool,
    /// `(display-mode: standalone)` matches.
    pub display_standalone: bool,
    /// iOS `navigator.standalone`.
    pub navigator_standalone: bool,
    pub referrer: Option<String>,
    pub online: bool,
}

impl PlatformSignals {
    /// A capable browser tab, online, not installed.
    pub fn browser_tab() -> Self {
        Self {
            service_worker: true,
            push_manager: true,
            online: true,
            ..Self::default()
        }
    }

    pub fn supports_pwa(&self) -> bool {
        self.service_worker && self.push_manager
    }

    pub fn is_standalone(&self) -> bool {
        self.display_standalone
            || self.navigator_standalone
            || self
                .referrer
                .as_deref()
                .is_some_and(|r| r.contains("android-app://"))
    }
}

/// Derived PWA state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwaStatus {
    pub is_installable: bool,
    pub is_installed: bool,
    pub is_offline: bool,
    pub is_standalone: bool,
    pub supports_pwa: bool,
}

impl PwaStatus {
    /// Initial state from platform signals and the persisted installed flag.
    pub fn detect(signals: &PlatformSignals, installed_flag: bool) -> Self {
        let is_standalone = signals.is_standalone();
        Self {
            is_installable: false,
            is_installed: is_standalone || installed_flag,
            is_offline: !signals.online,
            is_standalone,
            supports_pwa: signals.supports_pwa(),
        }
    }
}

/// The user's answer to the native install dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallChoice {
    Accepted,
    Dismissed,
}

/// A deferred install prompt handed over by the platform. Usable once.
#[async_trait]
pub trait InstallIntent: Send + Sync {
    /// Show the native dialog and wait for the user's choice.
    async fn prompt(&self) -> Result<InstallChoice>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_tab() {
        let status = PwaStatus::detect(&PlatformSignals::browser_tab(), false);
        assert!(status.supports_pwa);
        assert!(!status.is_installed);
        assert!(!status.is_standalone);
        assert!(!status.is_offline);
    }

    #[test]
    fn test_standalone_sources() {
        let ios = PlatformSignals {
            navigator_standalone: true,
            ..PlatformSignals::browser_tab()
        };
        let twa = PlatformSignals {
            referrer: Some("android-app://com.verso.diario/".into()),
            ..PlatformSignals::browser_tab()
        };
        for signals in [ios, twa] {
            let status = PwaStatus::detect(&signals, false);
            assert!(status.is_standalone);
            assert!(status.is_installed);
        }
    }

    #[test]
    fn test_installed_flag_without_standalone() {
        let status = PwaStatus::detect(&PlatformSignals::browser_tab(), true);
        assert!(status.is_installed);
        assert!(!status.is_standalone);
    }

    #[test]
    fn test_unsupported_without_push() {
        let signals = PlatformSignals {
            push_manager: false,
            online: false,
            ..PlatformSignals::browser_tab()
        };
        let status = PwaStatus::detect(&signals, false);
        assert!(!status.supports_pwa);
        assert!(status.is_offline);
    }
}
