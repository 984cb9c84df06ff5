//! # Verso PWA
//!
//! Page-side half of the offline shell.
//!
//! ## Features
//!
//! - **Registration**: register `/sw.js`, poll it for updates, surface
//!   "update available" once per new worker
//! - **Install prompt**: installability detection and a dismissal window
//! - **Notifications**: permission prompt gate and a durable daily reminder
//! - **Settings**: typed, validated persisted flags
//!
//! All collaborators (worker container, storage, clock, permission dialog,
//! page window) are injected, so the controller runs the same way in tests.

pub mod clock;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod install;
pub mod notify;
pub mod prefs;
pub mod status;

pub use clock::{next_occurrence, Clock, ManualClock, SystemClock};
pub use config::PwaConfig;
pub use controller::{PwaController, PwaParts, PwaSnapshot};
pub use coordinator::{PageHost, RegistrationCoordinator, RegistrationState};
pub use install::InstallPrompt;
pub use notify::{NotificationScheduler, Permission, PermissionPrompter};
pub use prefs::{FileStore, KeyValueStore, MemoryStore, Setting, Settings};
pub use status::{InstallChoice, InstallIntent, PlatformSignals, PwaStatus};
