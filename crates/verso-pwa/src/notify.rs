//! Notification permission prompt and the daily reminder schedule.
//!
//! The next fire time is persisted under `notification-next-fire`, so a
//! restarted page picks the schedule up again through [`NotificationScheduler::resume`]
//! instead of waiting for the user to grant permission a second time.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use verso_sw::{Notification, NotificationSink};

use crate::clock::Clock;
use crate::config::PwaConfig;
use crate::prefs::{Settings, NOTIFICATION_NEXT_FIRE, NOTIFICATION_PROMPTED_AT};

/// Notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Never answered.
    #[default]
    Default,
    Granted,
    Denied,
}

/// Platform permission dialog.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    fn current(&self) -> Permission;

    /// Ask the user. Closing the dialog leaves [`Permission::Default`].
    async fn request(&self) -> Permission;
}

struct SchedulerInner {
    settings: Settings,
    clock: Arc<dyn Clock>,
    prompter: Arc<dyn PermissionPrompter>,
    sink: Arc<dyn NotificationSink>,
    config: PwaConfig,
}

impl SchedulerInner {
    fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.settings
            .get(&NOTIFICATION_NEXT_FIRE)
            .and_then(DateTime::from_timestamp_millis)
    }

    /// Compute and persist the first reminder strictly after `after`.
    fn plan_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let Some(next) = self.clock.next_local(after, self.config.reminder_time) else {
            warn!(%after, "No reminder time could be computed");
            return None;
        };
        if let Err(e) = self
            .settings
            .set(&NOTIFICATION_NEXT_FIRE, &Some(next.timestamp_millis()))
        {
            warn!(error = %e, category = e.category(), "Could not persist reminder schedule");
        }
        debug!(next = %next, "Daily reminder scheduled");
        Some(next)
    }

    /// Show the reminder and plan the following one.
    async fn fire(&self) -> Option<DateTime<Utc>> {
        if self.prompter.current() != Permission::Granted {
            info!("Notification permission revoked, dropping reminder schedule");
            if let Err(e) = self.settings.clear(&NOTIFICATION_NEXT_FIRE) {
                warn!(error = %e, category = e.category(), "Could not clear reminder schedule");
            }
            return None;
        }

        let reminder =
            Notification::daily_reminder(&self.config.reminder_title, &self.config.reminder_body);
        match self.sink.show(reminder).await {
            Ok(()) => info!("Daily reminder shown"),
            Err(e) => warn!(error = %e, "Daily reminder could not be shown"),
        }

        let now = self.clock.now();
        let after = self.next_fire().map_or(now, |due| due.max(now));
        self.plan_after(after)
    }

    fn delay_until(&self, target: DateTime<Utc>) -> std::time::Duration {
        (target - self.clock.now()).to_std().unwrap_or_default()
    }
}

async fn run_timer(inner: Weak<SchedulerInner>) {
    loop {
        let delay = {
            let Some(inner) = inner.upgrade() else { return };
            match inner.next_fire() {
                Some(target) => inner.delay_until(target),
                None => return,
            }
        };

        tokio::time::sleep(delay).await;

        let Some(inner) = inner.upgrade() else { return };
        if inner.fire().await.is_none() {
            return;
        }
    }
}

/// Notification prompt gate and daily reminder timer.
pub struct NotificationScheduler {
    inner: Arc<SchedulerInner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationScheduler {
    pub fn new(
        settings: Settings,
        clock: Arc<dyn Clock>,
        prompter: Arc<dyn PermissionPrompter>,
        sink: Arc<dyn NotificationSink>,
        config: PwaConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                settings,
                clock,
                prompter,
                sink,
                config,
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn permission(&self) -> Permission {
        self.inner.prompter.current()
    }

    /// Whether the permission prompt may be shown right now.
    pub fn should_prompt(&self) -> bool {
        if self.permission() != Permission::Default {
            return false;
        }
        let last = self.inner.settings.get(&NOTIFICATION_PROMPTED_AT);
        let elapsed = self.inner.clock.now_millis() - last;
        elapsed > self.inner.config.notification_prompt_window().num_milliseconds()
    }

    /// Wait out the prompt delay, then evaluate the gate.
    pub async fn wait_for_prompt(&self) -> bool {
        tokio::time::sleep(self.inner.config.notification_prompt_delay()).await;
        self.should_prompt()
    }

    /// Ask for permission; on grant the daily reminder is scheduled.
    /// Any answer records the prompt time.
    pub async fn request_permission(&self) -> Permission {
        let permission = match self.permission() {
            Permission::Default => self.inner.prompter.request().await,
            answered => answered,
        };

        self.record_prompt();
        match permission {
            Permission::Granted => {
                info!("Notifications enabled");
                self.schedule_next();
            }
            other => info!(permission = ?other, "Notifications not enabled"),
        }
        permission
    }

    /// The user closed the prompt without answering.
    pub fn dismiss_prompt(&self) {
        self.record_prompt();
    }

    /// Schedule the next reminder strictly after now and arm the timer.
    pub fn schedule_next(&self) -> Option<DateTime<Utc>> {
        let next = self.inner.plan_after(self.inner.clock.now())?;
        self.arm();
        Some(next)
    }

    /// Restore a persisted schedule. An overdue reminder fires once before
    /// the timer is re-armed. Returns the upcoming fire time.
    pub async fn resume(&self) -> Option<DateTime<Utc>> {
        if self.permission() != Permission::Granted {
            debug!("Notifications not granted, no reminder to resume");
            return None;
        }

        let next = match self.inner.next_fire() {
            None => return self.schedule_next(),
            Some(due) if due <= self.inner.clock.now() => {
                info!(due = %due, "Reminder overdue, firing now");
                self.inner.fire().await?
            }
            Some(due) => due,
        };
        self.arm();
        Some(next)
    }

    /// Show the reminder now and schedule the following one.
    pub async fn fire(&self) -> Option<DateTime<Utc>> {
        let next = self.inner.fire().await?;
        self.arm();
        Some(next)
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.inner.next_fire()
    }

    /// Stop the reminder timer. The persisted schedule is kept.
    pub fn cancel(&self) {
        if let Some(timer) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            timer.abort();
        }
    }

    fn record_prompt(&self) {
        let now = self.inner.clock.now_millis();
        if let Err(e) = self.inner.settings.set(&NOTIFICATION_PROMPTED_AT, &now) {
            warn!(error = %e, category = e.category(), "Could not persist notification prompt time");
        }
    }

    fn arm(&self) {
        let handle = tokio::spawn(run_timer(Arc::downgrade(&self.inner)));
        if let Some(previous) = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle)
        {
            previous.abort();
        }
    }
}

impl Drop for NotificationScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for NotificationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationScheduler")
            .field("permission", &self.permission())
            .field("next_fire", &self.next_fire())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::prefs::MemoryStore;
    use std::time::Duration;
    use verso_sw::testing::RecordingSink;

    struct FakePrompter {
        current: Mutex<Permission>,
        answer: Permission,
    }

    impl FakePrompter {
        fn new(current: Permission, answer: Permission) -> Arc<Self> {
            Arc::new(Self {
                current: Mutex::new(current),
                answer,
            })
        }

        fn set(&self, permission: Permission) {
            *self.current.lock().unwrap() = permission;
        }
    }

    #[async_trait]
    impl PermissionPrompter for FakePrompter {
        fn current(&self) -> Permission {
            *self.current.lock().unwrap()
        }

        async fn request(&self) -> Permission {
            self.set(self.answer);
            self.answer
        }
    }

    struct Harness {
        scheduler: NotificationScheduler,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
        prompter: Arc<FakePrompter>,
        settings: Settings,
    }

    fn harness(local: &str, current: Permission, answer: Permission) -> Harness {
        harness_with(Settings::new(Arc::new(MemoryStore::new())), local, current, answer)
    }

    fn harness_with(settings: Settings, local: &str, current: Permission, answer: Permission) -> Harness {
        let clock = Arc::new(ManualClock::at_local(local, -3).unwrap());
        let sink = Arc::new(RecordingSink::new());
        let prompter = FakePrompter::new(current, answer);
        let scheduler = NotificationScheduler::new(
            settings.clone(),
            clock.clone(),
            prompter.clone(),
            sink.clone(),
            PwaConfig::default(),
        );
        Harness {
            scheduler,
            clock,
            sink,
            prompter,
            settings,
        }
    }

    fn local(h: &Harness, t: DateTime<Utc>) -> String {
        t.with_timezone(&h.clock.offset())
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    #[tokio::test]
    async fn test_prompt_gate() {
        let h = harness("2024-05-01 12:00:00", Permission::Default, Permission::Denied);
        assert!(h.scheduler.should_prompt());

        h.scheduler.dismiss_prompt();
        assert!(!h.scheduler.should_prompt());

        h.clock.advance(chrono::Duration::days(7) + chrono::Duration::milliseconds(1));
        assert!(h.scheduler.should_prompt());

        assert_eq!(h.scheduler.request_permission().await, Permission::Denied);
        h.clock.advance(chrono::Duration::days(30));
        // An explicit answer is never re-prompted.
        assert!(!h.scheduler.should_prompt());
        assert_eq!(h.scheduler.next_fire(), None);
    }

    #[tokio::test]
    async fn test_grant_at_eight_schedules_nine_today() {
        let h = harness("2024-05-01 08:00:00", Permission::Default, Permission::Granted);

        assert_eq!(h.scheduler.request_permission().await, Permission::Granted);

        let next = h.scheduler.next_fire().unwrap();
        assert_eq!(local(&h, next), "2024-05-01 09:00");
        assert_eq!(h.settings.get(&NOTIFICATION_PROMPTED_AT), h.clock.now_millis());
    }

    #[tokio::test]
    async fn test_grant_after_nine_schedules_tomorrow() {
        let h = harness("2024-05-01 21:15:00", Permission::Default, Permission::Granted);
        h.scheduler.request_permission().await;
        let next = h.scheduler.next_fire().unwrap();
        assert_eq!(local(&h, next), "2024-05-02 09:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_and_reschedules() {
        let h = harness("2024-05-01 08:59:30", Permission::Default, Permission::Granted);
        h.scheduler.request_permission().await;

        tokio::time::sleep(Duration::from_secs(31)).await;

        let shown = h.sink.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].tag.as_deref(), Some("daily-verse"));
        assert_eq!(shown[0].body, "Seu novo versículo do dia está disponível!");
        assert_eq!(shown[0].actions.len(), 2);

        let next = h.scheduler.next_fire().unwrap();
        assert_eq!(local(&h, next), "2024-05-02 09:00");
    }

    #[tokio::test]
    async fn test_resume_fires_overdue_once() {
        let settings = Settings::new(Arc::new(MemoryStore::new()));
        let first = harness_with(settings.clone(), "2024-05-01 08:00:00", Permission::Granted, Permission::Granted);
        first.scheduler.schedule_next();
        drop(first);

        // Page comes back two days later.
        let h = harness_with(settings, "2024-05-03 10:00:00", Permission::Granted, Permission::Granted);
        let next = h.scheduler.resume().await.unwrap();

        assert_eq!(h.sink.shown().len(), 1);
        assert_eq!(local(&h, next), "2024-05-04 09:00");
    }

    #[tokio::test]
    async fn test_resume_keeps_future_schedule() {
        let h = harness("2024-05-01 08:00:00", Permission::Granted, Permission::Granted);
        h.scheduler.schedule_next();

        let next = h.scheduler.resume().await.unwrap();
        assert!(h.sink.shown().is_empty());
        assert_eq!(local(&h, next), "2024-05-01 09:00");
    }

    #[tokio::test]
    async fn test_revoked_permission_stops_schedule() {
        let h = harness("2024-05-01 08:00:00", Permission::Granted, Permission::Granted);
        h.scheduler.schedule_next();

        h.prompter.set(Permission::Denied);
        assert_eq!(h.scheduler.fire().await, None);
        assert!(h.sink.shown().is_empty());
        assert_eq!(h.scheduler.next_fire(), None);
        assert_eq!(h.scheduler.resume().await, None);
    }
}
