//! Desktop notifications. Every notification goes through a [NotificationGate] which makes sure
//! that only one is visible at a time and that they don't arrive in bursts.

use std::{
    process::Stdio,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::utils::clock::Clock;

pub const NOTIFICATION_COOLDOWN: chrono::Duration = chrono::Duration::seconds(30);

const DESKTOP_TIMEOUT: Duration = Duration::from_secs(60);
const DISABLE_ACTION: &str = "disable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Pomodoro,
    BreakReminder,
    AppLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    /// Offer a "Disable" action next to the regular dismissal.
    pub offers_disable: bool,
}

/// What the user did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Dismissed,
    Disabled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Shown(NotificationOutcome),
    /// The gate held the notification back. The notifier was never called.
    Suppressed,
}

/// Shows a notification and waits until the user reacts to it or it expires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<NotificationOutcome>;
}

/// Writes notifications into the log. Used where no desktop notification service exists.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<NotificationOutcome> {
        info!(
            "Notification {:?}: {} - {}",
            notification.kind, notification.title, notification.body
        );
        Ok(NotificationOutcome::TimedOut)
    }
}

/// Uses `notify-send --wait`, which blocks until the notification is closed and prints the
/// chosen action.
pub struct DesktopNotifier {
    timeout: Duration,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            timeout: DESKTOP_TIMEOUT,
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    #[instrument(skip_all, fields(kind = ?notification.kind))]
    async fn notify(&self, notification: &Notification) -> Result<NotificationOutcome> {
        let mut command = Command::new("notify-send");
        command
            .arg("--app-name=focuslog")
            .arg("--wait")
            .arg(format!("--expire-time={}", self.timeout.as_millis()));
        if notification.offers_disable {
            command.arg(format!("--action={DISABLE_ACTION}=Disable"));
        }
        command
            .arg(&notification.title)
            .arg(&notification.body)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output.context("Failed to run notify-send")?,
            Err(_) => return Ok(NotificationOutcome::TimedOut),
        };

        let action = String::from_utf8_lossy(&output.stdout);
        debug!("notify-send finished with {:?} and action {action:?}", output.status);
        Ok(match action.trim() {
            DISABLE_ACTION => NotificationOutcome::Disabled,
            _ => NotificationOutcome::Dismissed,
        })
    }
}

/// Global rate limit and mutual exclusion for notifications.
pub struct NotificationGate {
    notifier: Box<dyn Notifier>,
    clock: Arc<dyn Clock>,
    cooldown: chrono::Duration,
    last_shown: Mutex<Option<DateTime<Utc>>>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl NotificationGate {
    pub fn new(notifier: Box<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self::with_cooldown(notifier, clock, NOTIFICATION_COOLDOWN)
    }

    pub fn with_cooldown(
        notifier: Box<dyn Notifier>,
        clock: Arc<dyn Clock>,
        cooldown: chrono::Duration,
    ) -> Self {
        Self {
            notifier,
            clock,
            cooldown,
            last_shown: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Shows `notification` unless another one is visible or the last one was shown less than a
    /// cooldown ago. A notifier failure counts as shown and expired, so a broken notification
    /// service doesn't get retried on every tick.
    pub async fn deliver(&self, notification: &Notification) -> Delivery {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Suppressing {:?}, another notification is visible", notification.kind);
            return Delivery::Suppressed;
        }
        let _guard = InFlight(&self.in_flight);

        let now = self.clock.time();
        {
            let mut last_shown = self
                .last_shown
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(last) = *last_shown {
                if now - last < self.cooldown {
                    debug!("Suppressing {:?}, still in cooldown", notification.kind);
                    return Delivery::Suppressed;
                }
            }
            *last_shown = Some(now);
        }

        match self.notifier.notify(notification).await {
            Ok(outcome) => Delivery::Shown(outcome),
            Err(e) => {
                warn!("Failed to show notification {e:?}");
                Delivery::Shown(NotificationOutcome::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::{TimeZone, Utc};
    use tokio::sync::Notify;

    use crate::utils::clock::ManualClock;

    use super::{
        Delivery, MockNotifier, Notification, NotificationGate, NotificationKind,
        NotificationOutcome, Notifier,
    };

    fn notification(kind: NotificationKind) -> Notification {
        Notification {
            kind,
            title: "Time for a break".into(),
            body: "You have been at it for an hour".into(),
            offers_disable: true,
        }
    }

    #[tokio::test]
    async fn cooldown_suppresses_second_notification() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .times(2)
            .returning(|_| Ok(NotificationOutcome::Dismissed));
        let gate = NotificationGate::new(Box::new(notifier), Arc::new(clock.clone()));

        let reminder = notification(NotificationKind::BreakReminder);
        assert_eq!(
            gate.deliver(&reminder).await,
            Delivery::Shown(NotificationOutcome::Dismissed)
        );
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(gate.deliver(&reminder).await, Delivery::Suppressed);

        clock.advance(chrono::Duration::seconds(25));
        assert_eq!(
            gate.deliver(&reminder).await,
            Delivery::Shown(NotificationOutcome::Dismissed)
        );
    }

    #[tokio::test]
    async fn notifier_errors_count_as_expired() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("no notification daemon")));
        let gate = NotificationGate::new(Box::new(notifier), Arc::new(clock));

        assert_eq!(
            gate.deliver(&notification(NotificationKind::Pomodoro)).await,
            Delivery::Shown(NotificationOutcome::TimedOut)
        );
    }

    /// Holds the notification open until the test releases it.
    struct BlockingNotifier {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait::async_trait]
    impl Notifier for BlockingNotifier {
        async fn notify(&self, _: &Notification) -> anyhow::Result<NotificationOutcome> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(NotificationOutcome::Disabled)
        }
    }

    #[tokio::test]
    async fn only_one_notification_is_visible() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gate = Arc::new(NotificationGate::with_cooldown(
            Box::new(BlockingNotifier {
                entered: entered.clone(),
                release: release.clone(),
            }),
            Arc::new(clock),
            chrono::Duration::zero(),
        ));

        let first = tokio::spawn({
            let gate = gate.clone();
            async move { gate.deliver(&notification(NotificationKind::AppLimit)).await }
        });
        entered.notified().await;

        assert_eq!(
            gate.deliver(&notification(NotificationKind::BreakReminder)).await,
            Delivery::Suppressed
        );

        release.notify_one();
        let outcome = tokio::time::timeout(Duration::from_secs(5), first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Delivery::Shown(NotificationOutcome::Disabled));
    }
}
