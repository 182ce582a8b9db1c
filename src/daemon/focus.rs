use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, error, info};

use crate::{
    classify::{app_display_name, executable_stem},
    config::{Settings, SettingsHandle},
    storage::usage_store::UsageStore,
    utils::{clock::Clock, time::local_date_of},
};

use super::{
    notify::{Delivery, Notification, NotificationGate, NotificationKind, NotificationOutcome},
    pomodoro::PomodoroTimer,
    tracker::SessionTracker,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LimitState {
    Snoozed(DateTime<Utc>),
    /// No more notifications for this app today.
    Done,
}

/// Runs the lower frequency checks: pomodoro completion, break reminders and daily app limits.
/// Owned by a single task, so snooze state needs no locking.
pub struct FocusMonitor {
    tracker: Arc<SessionTracker>,
    store: Arc<dyn UsageStore>,
    settings: Arc<SettingsHandle>,
    pomodoro: PomodoroTimer,
    gate: NotificationGate,
    clock: Arc<dyn Clock>,
    break_snoozed_until: Option<DateTime<Utc>>,
    limits: HashMap<String, LimitState>,
    limits_date: Option<NaiveDate>,
}

impl FocusMonitor {
    pub fn new(
        tracker: Arc<SessionTracker>,
        store: Arc<dyn UsageStore>,
        settings: Arc<SettingsHandle>,
        pomodoro: PomodoroTimer,
        gate: NotificationGate,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            store,
            settings,
            pomodoro,
            gate,
            clock,
            break_snoozed_until: None,
            limits: HashMap::new(),
            limits_date: None,
        }
    }

    pub async fn check(&mut self) {
        self.settings.reload_if_changed();
        let settings = self.settings.current();
        let now = self.clock.time();

        if let Err(e) = self.check_pomodoro(now).await {
            error!("Pomodoro check failed {e:?}");
        }
        if settings.paused {
            return;
        }
        self.check_break(&settings, now).await;
        if let Err(e) = self.check_limits(&settings, now).await {
            error!("App limit check failed {e:?}");
        }
    }

    async fn check_pomodoro(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.pomodoro.is_due(now)? {
            return Ok(());
        }
        let notification = Notification {
            kind: NotificationKind::Pomodoro,
            title: "Pomodoro complete".into(),
            body: "Time for a short break.".into(),
            offers_disable: false,
        };
        match self.gate.deliver(&notification).await {
            Delivery::Shown(_) => self.pomodoro.mark_notified(),
            Delivery::Suppressed => Ok(()),
        }
    }

    async fn check_break(&mut self, settings: &Settings, now: DateTime<Utc>) {
        if !settings.break_reminder.enabled {
            return;
        }
        if self.break_snoozed_until.is_some_and(|until| now < until) {
            return;
        }
        let threshold = Duration::minutes(settings.break_reminder_minutes() as i64);
        let used = self.tracker.continuous_use();
        if used < threshold {
            return;
        }

        let notification = Notification {
            kind: NotificationKind::BreakReminder,
            title: "Time for a break".into(),
            body: format!("You have been active for {} minutes.", used.num_minutes()),
            offers_disable: true,
        };
        match self.gate.deliver(&notification).await {
            Delivery::Shown(NotificationOutcome::Disabled) => {
                info!("Break reminders disabled from notification");
                if let Err(e) = self.settings.update(|s| s.set_break_reminder(false, None)) {
                    error!("Failed to disable break reminders {e:?}");
                }
            }
            Delivery::Shown(_) => {
                self.break_snoozed_until =
                    Some(now + Duration::minutes(settings.snooze_minutes() as i64));
            }
            Delivery::Suppressed => (),
        }
    }

    async fn check_limits(&mut self, settings: &Settings, now: DateTime<Utc>) -> Result<()> {
        if settings.app_limits().is_empty() {
            return Ok(());
        }

        let today = local_date_of(now);
        if self.limits_date != Some(today) {
            self.limits.clear();
            self.limits_date = Some(today);
        }

        // Only the app in focus is reminded of its limit.
        let Some(focused) = self.tracker.current_session() else {
            return Ok(());
        };
        let focused_stem = executable_stem(&focused.executable_name);

        let store = self.store.clone();
        let stats = tokio::task::spawn_blocking(move || store.app_stats_for(today)).await??;

        for (executable, minutes) in settings.app_limits() {
            let stem = executable_stem(executable);
            if stem != focused_stem {
                continue;
            }
            let used_secs: i64 = stats
                .iter()
                .filter(|v| executable_stem(&v.executable_name) == stem)
                .map(|v| v.total_secs)
                .sum();
            if used_secs < *minutes as i64 * 60 {
                continue;
            }
            match self.limits.get(&stem) {
                Some(LimitState::Done) => continue,
                Some(LimitState::Snoozed(until)) if now < *until => continue,
                _ => (),
            }

            let notification = Notification {
                kind: NotificationKind::AppLimit,
                title: format!("{} limit reached", app_display_name(executable)),
                body: format!("You've used it for {} minutes today.", used_secs / 60),
                offers_disable: true,
            };
            match self.gate.deliver(&notification).await {
                Delivery::Shown(NotificationOutcome::Dismissed) => {
                    let until = now + Duration::minutes(settings.snooze_minutes() as i64);
                    self.limits.insert(stem, LimitState::Snoozed(until));
                }
                Delivery::Shown(_) => {
                    self.limits.insert(stem, LimitState::Done);
                }
                Delivery::Suppressed => {
                    debug!("Limit notification for {executable} held back");
                    break;
                }
            }
        }
        Ok(())
    }
}
