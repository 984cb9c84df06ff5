//! Notification payloads shown by the worker and the daily reminder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceWorkerError;

pub const APP_TITLE: &str = "Verso Diário";
pub const DEFAULT_PUSH_BODY: &str = "Novo verso do dia disponível!";
pub const REMINDER_BODY: &str = "Seu novo versículo do dia está disponível!";
pub const REMINDER_TAG: &str = "daily-verse";
pub const ICON: &str = "/icons/icon-192x192.png";
pub const BADGE: &str = "/icons/icon-72x72.png";

/// Arbitrary data bag; the target URL is the only field read back.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub data: NotificationData,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Notification for an incoming push; empty payloads get the default body.
    pub fn push(payload: Option<&str>) -> Self {
        let body = payload
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PUSH_BODY);
        Self {
            title: APP_TITLE.to_string(),
            body: body.to_string(),
            icon: ICON.to_string(),
            badge: BADGE.to_string(),
            tag: None,
            data: NotificationData {
                url: Some("/".to_string()),
            },
            actions: Vec::new(),
        }
    }

    /// The daily reminder with its view / dismiss actions.
    pub fn daily_reminder(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            icon: ICON.to_string(),
            badge: BADGE.to_string(),
            tag: Some(REMINDER_TAG.to_string()),
            data: NotificationData {
                url: Some("/".to_string()),
            },
            actions: vec![
                NotificationAction {
                    action: "view".to_string(),
                    title: "Ver Versículo".to_string(),
                    icon: Some(BADGE.to_string()),
                },
                NotificationAction {
                    action: "dismiss".to_string(),
                    title: "Dispensar".to_string(),
                    icon: None,
                },
            ],
        }
    }

    /// Where a click on this notification leads.
    pub fn target_url(&self) -> &str {
        self.data.url.as_deref().unwrap_or("/")
    }
}

/// Platform notification centre.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show(&self, notification: Notification) -> Result<(), ServiceWorkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_default_body() {
        assert_eq!(Notification::push(None).body, DEFAULT_PUSH_BODY);
        assert_eq!(Notification::push(Some("  ")).body, DEFAULT_PUSH_BODY);
        assert_eq!(Notification::push(Some("Salmo 23")).body, "Salmo 23");
    }

    #[test]
    fn test_daily_reminder_shape() {
        let n = Notification::daily_reminder(APP_TITLE, REMINDER_BODY);
        assert_eq!(n.tag.as_deref(), Some(REMINDER_TAG));
        let actions: Vec<&str> = n.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["view", "dismiss"]);
        assert_eq!(n.target_url(), "/");
    }

    #[test]
    fn test_target_url_defaults_to_root() {
        let mut n = Notification::push(None);
        n.data.url = None;
        assert_eq!(n.target_url(), "/");
    }
}
