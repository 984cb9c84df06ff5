//! Page controller configuration.

use std::time::Duration;

use chrono::{NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use verso_common::{Result, VersoError};

/// Page controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PwaConfig {
    /// Worker script path, relative to the origin.
    pub worker_path: String,

    /// Registration scope.
    pub scope: String,

    /// Seconds between background update checks.
    pub update_poll_secs: u64,

    /// Delay before the install prompt may appear.
    pub install_prompt_delay_ms: u64,

    /// Days a dismissed install prompt stays hidden.
    pub install_dismiss_days: i64,

    /// Delay before the notification prompt may appear.
    pub notification_prompt_delay_ms: u64,

    /// Days between notification prompts.
    pub notification_prompt_days: i64,

    /// Local wall time of the daily reminder.
    pub reminder_time: NaiveTime,

    pub reminder_title: String,
    pub reminder_body: String,
}

impl Default for PwaConfig {
    fn default() -> Self {
        Self {
            worker_path: "/sw.js".to_string(),
            scope: "/".to_string(),
            update_poll_secs: 60,
            install_prompt_delay_ms: 3_000,
            install_dismiss_days: 7,
            notification_prompt_delay_ms: 30_000,
            notification_prompt_days: 7,
            reminder_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            reminder_title: verso_sw::notification::APP_TITLE.to_string(),
            reminder_body: verso_sw::notification::REMINDER_BODY.to_string(),
        }
    }
}

impl PwaConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| VersoError::config(format!("invalid page config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.update_poll_secs == 0 {
            return Err(VersoError::config("update_poll_secs must be positive"));
        }
        for (name, days) in [
            ("install_dismiss_days", self.install_dismiss_days),
            ("notification_prompt_days", self.notification_prompt_days),
        ] {
            if days < 0 {
                return Err(VersoError::config(format!("{name} cannot be negative")));
            }
            if TimeDelta::try_days(days).is_none() {
                return Err(VersoError::config(format!("{name} is out of range: {days}")));
            }
        }
        Ok(())
    }

    pub fn update_poll(&self) -> Duration {
        Duration::from_secs(self.update_poll_secs)
    }

    pub fn install_prompt_delay(&self) -> Duration {
        Duration::from_millis(self.install_prompt_delay_ms)
    }

    pub fn notification_prompt_delay(&self) -> Duration {
        Duration::from_millis(self.notification_prompt_delay_ms)
    }

    /// Saturates at [`TimeDelta::MAX`] for configs that skipped validation.
    pub fn install_dismiss_window(&self) -> TimeDelta {
        TimeDelta::try_days(self.install_dismiss_days).unwrap_or(TimeDelta::MAX)
    }

    pub fn notification_prompt_window(&self) -> TimeDelta {
        TimeDelta::try_days(self.notification_prompt_days).unwrap_or(TimeDelta::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PwaConfig::default();
        assert_eq!(config.worker_path, "/sw.js");
        assert_eq!(config.update_poll(), Duration::from_secs(60));
        assert_eq!(config.install_prompt_delay(), Duration::from_secs(3));
        assert_eq!(config.notification_prompt_delay(), Duration::from_secs(30));
        assert_eq!(config.reminder_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(config.reminder_title, "Verso Diário");
    }

    #[test]
    fn test_partial_json() {
        let config =
            PwaConfig::from_json(r#"{"update_poll_secs": 5, "reminder_time": "07:30:00"}"#).unwrap();
        assert_eq!(config.update_poll(), Duration::from_secs(5));
        assert_eq!(config.reminder_time, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(config.scope, "/");
    }

    #[test]
    fn test_rejects_zero_poll() {
        assert!(PwaConfig::from_json(r#"{"update_poll_secs": 0}"#).is_err());
    }

    #[test]
    fn test_rejects_unrepresentable_windows() {
        assert!(PwaConfig::from_json(r#"{"install_dismiss_days": 200000000000}"#).is_err());
        assert!(PwaConfig::from_json(r#"{"notification_prompt_days": 200000000000}"#).is_err());
        assert!(PwaConfig::from_json(r#"{"install_dismiss_days": -1}"#).is_err());
        assert!(PwaConfig::from_json(r#"{"install_dismiss_days": 36500}"#).is_ok());
    }

    #[test]
    fn test_unvalidated_window_saturates() {
        let config = PwaConfig {
            install_dismiss_days: i64::MAX,
            notification_prompt_days: i64::MAX,
            ..PwaConfig::default()
        };
        assert_eq!(config.install_dismiss_window(), TimeDelta::MAX);
        assert_eq!(config.notification_prompt_window(), TimeDelta::MAX);
    }
}
